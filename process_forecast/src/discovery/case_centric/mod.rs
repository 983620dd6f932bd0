//! Discovery algorithms for case-centric event logs
pub mod dfg;
pub mod inductive_miner;
