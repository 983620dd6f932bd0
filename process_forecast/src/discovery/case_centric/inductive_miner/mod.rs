//! Inductive Process Discovery on Directly-Follows Graphs
//!
//! Recursively splits the [`DirectlyFollowsGraph`] of an [`EventLog`] into groups of
//! activities (cuts) and composes the discovered [`ProcessTree`]s of the groups with the
//! operator implied by the cut.
//! If no cut applies, a flower model is used, so discovery always succeeds.
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    core::process_models::case_centric::{
        dfg::DirectlyFollowsGraph,
        process_tree::{OperatorType, ProcessTree},
    },
    discovery::case_centric::dfg::discover_dfg,
    utils::cancellation::{CancellationToken, Cancelled},
    EventLog,
};

/// Cut detection on directly-follows graphs
pub mod cuts;

use cuts::{Cut, Group, CUT_DETECTORS};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
/// Algorithm parameters for inductive discovery
pub struct InductiveMinerConfig {
    /// Relative frequency in `[0, 1]` below which directly-follows edges count as noise
    ///
    /// See [`DirectlyFollowsGraph::filter_noise`]. `0` keeps all edges.
    pub noise_threshold: f64,
}

impl InductiveMinerConfig {
    /// Create a config with the given noise threshold
    pub fn new(noise_threshold: f64) -> Self {
        Self { noise_threshold }
    }
    /// Serialize parameters to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
    /// Deserialize parameters from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

///
/// Discover a [`ProcessTree`] from an [`EventLog`]
///
/// ```rust
/// use process_forecast::{discover, event_log};
///
/// let log = event_log!(["a", "b", "c"], ["a", "b", "c"]);
/// assert_eq!(discover(&log, 0.0).to_string(), "->( 'a', 'b', 'c' )");
/// ```
pub fn discover(event_log: &EventLog, noise_threshold: f64) -> ProcessTree {
    let dfg = discover_dfg(event_log);
    info!(
        traces = event_log.len(),
        activities = dfg.activities.len(),
        noise_threshold,
        "Discovering process tree"
    );
    let config = InductiveMinerConfig::new(noise_threshold);
    discover_from_dfg(&dfg, &config, &CancellationToken::new())
        .unwrap_or_else(|Cancelled| flower_model(&dfg))
}

///
/// Discover a [`ProcessTree`] from an [`EventLog`], checking `cancellation` at every
/// recursion step
///
pub fn discover_with_cancellation(
    event_log: &EventLog,
    config: &InductiveMinerConfig,
    cancellation: &CancellationToken,
) -> Result<ProcessTree, Cancelled> {
    let dfg = discover_dfg(event_log);
    discover_from_dfg(&dfg, config, cancellation)
}

///
/// Discover a [`ProcessTree`] from a [`DirectlyFollowsGraph`]
///
/// The result is deterministic: groups of a cut are always visited in the same order.
///
pub fn discover_from_dfg(
    dfg: &DirectlyFollowsGraph,
    config: &InductiveMinerConfig,
    cancellation: &CancellationToken,
) -> Result<ProcessTree, Cancelled> {
    let tree = mine(dfg, config.noise_threshold, cancellation)?;
    debug!("Discovered process tree: {tree}");
    Ok(tree)
}

fn mine(
    dfg: &DirectlyFollowsGraph,
    noise_threshold: f64,
    cancellation: &CancellationToken,
) -> Result<ProcessTree, Cancelled> {
    cancellation.check()?;
    let filtered = dfg.filter_noise(noise_threshold);

    let mut activities = filtered.activities.keys();
    match (activities.next(), activities.next()) {
        (None, _) => return Ok(ProcessTree::tau()),
        (Some(activity), None) => return Ok(single_activity(&filtered, activity)),
        _ => {}
    }

    for (name, detector) in CUT_DETECTORS {
        if let Some(cut) = detector(&filtered) {
            debug!(
                cut = name,
                activities = filtered.activities.len(),
                "Found cut"
            );
            return build_from_cut(&filtered, cut, noise_threshold, cancellation);
        }
    }

    debug!(
        activities = filtered.activities.len(),
        "No cut found, using flower model"
    );
    Ok(flower_model(&filtered))
}

fn mine_groups<'a, I>(
    dfg: &DirectlyFollowsGraph,
    groups: I,
    noise_threshold: f64,
    cancellation: &CancellationToken,
) -> Result<Vec<ProcessTree>, Cancelled>
where
    I: IntoIterator<Item = &'a Group>,
{
    let projections: Vec<DirectlyFollowsGraph> =
        groups.into_iter().map(|group| dfg.project(group)).collect();
    projections
        .par_iter()
        .map(|projection| mine(projection, noise_threshold, cancellation))
        .collect()
}

fn build_from_cut(
    dfg: &DirectlyFollowsGraph,
    cut: Cut,
    noise_threshold: f64,
    cancellation: &CancellationToken,
) -> Result<ProcessTree, Cancelled> {
    Ok(match cut {
        Cut::ExclusiveChoice(groups) => ProcessTree::operator(
            OperatorType::ExclusiveChoice,
            mine_groups(dfg, &groups, noise_threshold, cancellation)?,
        ),
        Cut::Sequence(groups) => {
            let children = mine_groups(
                dfg,
                groups.iter().map(|g| &g.activities),
                noise_threshold,
                cancellation,
            )?;
            let children = children
                .into_iter()
                .zip(&groups)
                .map(|(child, group)| {
                    if group.skippable {
                        ProcessTree::operator(
                            OperatorType::ExclusiveChoice,
                            vec![child, ProcessTree::tau()],
                        )
                    } else {
                        child
                    }
                })
                .collect();
            ProcessTree::operator(OperatorType::Sequence, children)
        }
        Cut::Concurrency(groups) => ProcessTree::operator(
            OperatorType::Concurrency,
            mine_groups(dfg, &groups, noise_threshold, cancellation)?,
        ),
        Cut::Loop { body, redo } => {
            let mut children = mine_groups(
                dfg,
                std::iter::once(&body).chain(&redo),
                noise_threshold,
                cancellation,
            )?;
            let do_part = children.remove(0);
            let redo_part = if children.len() == 1 {
                children.remove(0)
            } else {
                ProcessTree::operator(OperatorType::ExclusiveChoice, children)
            };
            ProcessTree::operator(OperatorType::Loop, vec![do_part, redo_part])
        }
    })
}

/// Leaf, or `*( a, tau )` if the activity directly follows itself
fn single_activity(dfg: &DirectlyFollowsGraph, activity: &str) -> ProcessTree {
    let leaf = ProcessTree::leaf(Some(activity.to_string()));
    if dfg.contains_df_relation((activity, activity)) {
        ProcessTree::operator(OperatorType::Loop, vec![leaf, ProcessTree::tau()])
    } else {
        leaf
    }
}

///
/// Flower model: all activities in one unrestricted loop, `*( X( a, b, ... ), tau )`
///
pub fn flower_model(dfg: &DirectlyFollowsGraph) -> ProcessTree {
    let mut leaves: Vec<ProcessTree> = dfg
        .activities
        .keys()
        .map(|a| ProcessTree::leaf(Some(a.clone())))
        .collect();
    let do_part = match leaves.len() {
        0 => return ProcessTree::tau(),
        1 => leaves.remove(0),
        _ => ProcessTree::operator(OperatorType::ExclusiveChoice, leaves),
    };
    ProcessTree::operator(OperatorType::Loop, vec![do_part, ProcessTree::tau()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log;

    fn mined(log: &EventLog) -> String {
        discover(log, 0.0).to_string()
    }

    #[test]
    fn sequence() {
        let log = event_log!(["A", "B", "C"], ["A", "B", "C"], ["A", "B", "C"]);
        assert_eq!(mined(&log), "->( 'A', 'B', 'C' )");
    }

    #[test]
    fn choice_concurrency_and_skip() {
        assert_eq!(
            mined(&event_log!(["a", "b"], ["a", "c"])),
            "->( 'a', X( 'b', 'c' ) )"
        );
        assert_eq!(
            mined(&event_log!(["a", "b", "c"], ["a", "c", "b"])),
            "->( 'a', +( 'b', 'c' ) )"
        );
        assert_eq!(
            mined(&event_log!(["a", "b", "c"], ["a", "c"])),
            "->( 'a', X( 'b', tau ), 'c' )"
        );
    }

    #[test]
    fn loops() {
        assert_eq!(mined(&event_log!(["a", "b", "a"])), "*( 'a', 'b' )");
        assert_eq!(mined(&event_log!(["a", "a"], ["a"])), "*( 'a', tau )");
    }

    #[test]
    fn flower_fallback() {
        let log = event_log!(["a", "b"], ["b", "c"], ["c", "a"]);
        assert_eq!(mined(&log), "*( X( 'a', 'b', 'c' ), tau )");
    }

    #[test]
    fn empty_log() {
        assert_eq!(discover(&EventLog::default(), 0.0), ProcessTree::tau());
    }

    #[test]
    fn noise_removes_infrequent_skip() {
        let mut traces = vec![vec![("a", None), ("b", None), ("c", None)]; 10];
        traces.push(vec![("a", None), ("c", None)]);
        let log = EventLog::from_activity_sequences(traces);
        assert_eq!(discover(&log, 0.0).to_string(), "->( 'a', X( 'b', tau ), 'c' )");
        assert_eq!(discover(&log, 0.5).to_string(), "->( 'a', 'b', 'c' )");
    }

    #[test]
    fn deterministic() {
        let log = event_log!(["a", "b", "d"], ["a", "c", "d", "e"], ["a", "d", "b"]);
        let first = discover(&log, 0.2);
        for _ in 0..5 {
            assert_eq!(discover(&log, 0.2), first);
        }
        assert!(first.is_valid());
    }

    #[test]
    fn cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let log = event_log!(["a", "b"]);
        assert_eq!(
            discover_with_cancellation(&log, &InductiveMinerConfig::default(), &token),
            Err(Cancelled)
        );
    }

    #[test]
    fn config_json() {
        let config = InductiveMinerConfig::new(0.15);
        let parsed = InductiveMinerConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }
}
