#![warn(
    clippy::doc_markdown,
    missing_debug_implementations,
    rust_2018_idioms,
    missing_docs
)]
#![allow(clippy::needless_doctest_main)]
#![doc = include_str!("../README.md")]

pub mod core;

pub mod discovery;

pub mod conversion;

pub mod conformance;

pub mod simulation;

/// Util module with smaller helper functions, structs or enums
pub mod utils;

#[cfg(test)]
mod tests;

#[doc(inline)]
pub use crate::core::{
    event_data::case_centric::{DataError, Event, EventLog, EventRecord, Trace},
    process_models::case_centric::{
        dfg::DirectlyFollowsGraph,
        petri_net::{Marking, PetriNet},
        process_tree::ProcessTree,
    },
};

#[doc(inline)]
pub use discovery::case_centric::inductive_miner::{discover, InductiveMinerConfig};

#[doc(inline)]
pub use conversion::process_tree_to_petri_net::{lower, StructuralInconsistency};

#[doc(inline)]
pub use conformance::case_centric::token_based_replay::{fitness, ReplayFitness};

#[doc(inline)]
pub use simulation::case_centric::{
    batch::{run_batch, BatchConfig, BatchResult, ResultsTable},
    critical_path::{critical_paths, CriticalPath},
    engine::{simulate, SimulationConfig, SyntheticLog},
    parameters::SimulationParameters,
};

#[doc(inline)]
pub use utils::cancellation::{CancellationToken, Cancelled};
