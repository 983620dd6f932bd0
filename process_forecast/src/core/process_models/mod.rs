//! Process Models
//!
//! Directly-follows graphs, process trees and Petri nets (flow nets)
pub mod case_centric;
