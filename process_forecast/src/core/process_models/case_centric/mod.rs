//! Case-centric process models
pub mod dfg;
pub mod petri_net;
pub mod process_tree;
