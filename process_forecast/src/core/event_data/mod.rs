//! Event Data
//!
//! Fundamental structs and adjacent utilities for process data
pub mod case_centric;
pub mod timestamp_utils;

#[doc(inline)]
pub use case_centric::EventLog;
