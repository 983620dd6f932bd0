//! Stochastic Simulation
//!
//! Monte Carlo simulation of process models, producing synthetic event data and
//! aggregate forecasts.
pub mod case_centric;
