//! Directly-follows graph
pub(crate) mod dfg_struct;
pub use dfg_struct::*;
