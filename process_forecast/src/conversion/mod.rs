//! Conversion between process model representations
pub mod process_tree_to_petri_net;
