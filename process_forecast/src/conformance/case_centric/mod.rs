//! Conformance checking for case-centric event logs
pub mod token_based_replay;
