//! Discover [`DirectlyFollowsGraph`]s from Data

use crate::core::{process_models::case_centric::dfg::DirectlyFollowsGraph, EventLog};

/// Discover a [`DirectlyFollowsGraph`] from an [`EventLog`]
///
/// Besides the directly-follows relations between consecutive events, the edges from the
/// virtual START node to the first activity and from the last activity to the virtual END
/// node are counted per trace. Empty traces contribute nothing.
pub fn discover_dfg(event_log: &EventLog) -> DirectlyFollowsGraph {
    let mut result = DirectlyFollowsGraph::new();
    event_log.traces().iter().for_each(|t| {
        let mut last_activity: Option<&str> = None;
        t.activities().for_each(|activity| {
            result.add_activity(activity, 1);

            if let Some(last) = last_activity.take() {
                result.add_df_relation(last, activity, 1)
            } else {
                result.add_start_activity(activity, 1);
            }

            last_activity = Some(activity);
        });
        if let Some(last) = last_activity.take() {
            result.add_end_activity(last, 1);
        }
    });

    result
}
