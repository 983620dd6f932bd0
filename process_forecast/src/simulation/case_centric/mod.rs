//! Token-game simulation of [`PetriNet`](crate::PetriNet)s
//!
//! Activity durations and quality outcomes are sampled from [`SimulationParameters`]
//! derived from a historical [`EventLog`](crate::EventLog).
//!
//! [`SimulationParameters`]: parameters::SimulationParameters

/// Batches of simulation runs and their results table
pub mod batch;
/// Longest traces of a synthetic log
pub mod critical_path;
/// Simulation of single runs
pub mod engine;
/// Derived statistics driving the simulation
pub mod parameters;
/// Seedable sources of random samples
pub mod random_source;
