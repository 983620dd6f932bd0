//! Process trees
pub(crate) mod process_tree_struct;
pub use process_tree_struct::*;
