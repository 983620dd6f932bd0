use ordered_float::OrderedFloat;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::engine::SyntheticLog;

///
/// One of the longest simulated cases
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CriticalPath {
    /// Case identifier in the synthetic log
    pub case_id: String,
    /// Case duration in minutes (end of last event minus start of first event)
    pub duration_minutes: f64,
    /// Executed activities in order
    pub activities: Vec<String>,
}

impl std::fmt::Display for CriticalPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.2} min: {}",
            self.duration_minutes,
            self.activities.join(" -> ")
        )
    }
}

///
/// The `k` longest completed traces of a [`SyntheticLog`], longest first
///
/// Traces of equal duration keep the order in which they were generated.
/// Deadlocked cases and cases that only fired silent transitions are not considered.
///
pub fn critical_paths(synthetic_log: &SyntheticLog, k: usize) -> Vec<CriticalPath> {
    let mut completed: Vec<_> = synthetic_log
        .completed_traces()
        .filter(|t| !t.events.is_empty())
        .map(|t| (t, t.duration()))
        .collect();
    // stable sort keeps generation order for ties
    completed.sort_by_key(|(_, duration)| std::cmp::Reverse(OrderedFloat(*duration)));
    completed
        .into_iter()
        .take(k)
        .map(|(trace, duration)| CriticalPath {
            case_id: trace.case_id.clone(),
            duration_minutes: duration,
            activities: trace.activities().map(str::to_string).collect(),
        })
        .collect()
}
