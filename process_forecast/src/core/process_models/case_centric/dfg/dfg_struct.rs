use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::collections::{BTreeMap, BTreeSet};

/// Activity in a directly-follows graph.
pub type Activity = String;

/// A directly-follows graph of [`Activity`]s.
///
/// Graph containing a set of activities, a set of directly-follows relations, and the
/// edges from the virtual START node (start activities) and into the virtual END node
/// (end activities).
/// Activities, directly-follows relations, start and end edges are all annotated with their
/// frequency.
///
/// All maps are ordered, so iteration (and everything derived from it) is deterministic.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectlyFollowsGraph {
    /// Activities
    pub activities: BTreeMap<Activity, u64>,
    /// Directly-follows relations
    #[serde_as(as = "Vec<(_, _)>")]
    pub directly_follows_relations: BTreeMap<(Activity, Activity), u64>,
    /// Start activities (edges START → activity)
    pub start_activities: BTreeMap<Activity, u64>,
    /// End activities (edges activity → END)
    pub end_activities: BTreeMap<Activity, u64>,
}

impl DirectlyFollowsGraph {
    /// Create new [`DirectlyFollowsGraph`] with no activities and directly-follows relations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Add an activity with a frequency.
    ///
    /// If the activity already exists, the frequency count is added to the existing activity.
    pub fn add_activity<S: Into<Activity>>(&mut self, activity: S, frequency: u64) {
        *self.activities.entry(activity.into()).or_default() += frequency;
    }

    /// Adds (or increments) the edge from START to an activity.
    pub fn add_start_activity<S: Into<Activity>>(&mut self, activity: S, frequency: u64) {
        *self.start_activities.entry(activity.into()).or_default() += frequency;
    }

    /// Adds (or increments) the edge from an activity to END.
    pub fn add_end_activity<S: Into<Activity>>(&mut self, activity: S, frequency: u64) {
        *self.end_activities.entry(activity.into()).or_default() += frequency;
    }

    /// Add a directly-follows relation with a frequency.
    ///
    /// If the directly-follows relation already exists, the frequency count is added to the
    /// existing directly-follows relation.
    pub fn add_df_relation<S1, S2>(&mut self, from: S1, to: S2, frequency: u64)
    where
        S1: Into<Activity>,
        S2: Into<Activity>,
    {
        *self
            .directly_follows_relations
            .entry((from.into(), to.into()))
            .or_default() += frequency;
    }

    /// Checks if an activity is already contained in the directly-follows graph.
    pub fn contains_activity<S: AsRef<str>>(&self, activity: S) -> bool {
        self.activities.contains_key(activity.as_ref())
    }

    /// Checks if an activity is a start activity in the directly-follows graph.
    pub fn is_start_activity<S: AsRef<str>>(&self, activity: S) -> bool {
        self.start_activities.contains_key(activity.as_ref())
    }

    /// Checks if an activity is an end activity in the directly-follows graph.
    pub fn is_end_activity<S: AsRef<str>>(&self, activity: S) -> bool {
        self.end_activities.contains_key(activity.as_ref())
    }

    /// Checks if a directly-follows relation is contained in the directly-follows graph.
    pub fn contains_df_relation<S: AsRef<str>>(&self, (a, b): (S, S)) -> bool {
        self.df_frequency(a, b) > 0
    }

    /// Frequency of the directly-follows relation `a → b` (`0` if absent).
    pub fn df_frequency<S: AsRef<str>>(&self, a: S, b: S) -> u64 {
        self.directly_follows_relations
            .get(&(a.as_ref().to_owned(), b.as_ref().to_owned()))
            .copied()
            .unwrap_or_default()
    }

    ///
    /// Discard infrequent edges
    ///
    /// An outgoing edge of activity `a` (including `a → END`) is removed if its frequency is
    /// below `noise_threshold` times the most frequent outgoing edge of `a`. Edges leaving
    /// START are filtered against the most frequent START edge.
    ///
    /// Activities are never removed. The threshold is clamped to `[0, 1]`; since the
    /// maxima are taken from `self`, raising the threshold can only remove more edges.
    ///
    pub fn filter_noise(&self, noise_threshold: f64) -> Self {
        if !(noise_threshold > 0.0) {
            return self.clone();
        }
        let threshold = noise_threshold.min(1.0);

        let mut max_outgoing: BTreeMap<&str, u64> = BTreeMap::new();
        for ((from, _), freq) in &self.directly_follows_relations {
            let max = max_outgoing.entry(from.as_str()).or_default();
            *max = (*max).max(*freq);
        }
        for (activity, freq) in &self.end_activities {
            let max = max_outgoing.entry(activity.as_str()).or_default();
            *max = (*max).max(*freq);
        }
        let max_start = self.start_activities.values().copied().max().unwrap_or_default();
        let keep = |freq: u64, max: u64| freq as f64 >= threshold * max as f64;
        let max_out_of = |activity: &str| max_outgoing.get(activity).copied().unwrap_or_default();

        Self {
            activities: self.activities.clone(),
            directly_follows_relations: self
                .directly_follows_relations
                .iter()
                .filter(|((from, _), freq)| keep(**freq, max_out_of(from.as_str())))
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            start_activities: self
                .start_activities
                .iter()
                .filter(|(_, freq)| keep(**freq, max_start))
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            end_activities: self
                .end_activities
                .iter()
                .filter(|(activity, freq)| keep(**freq, max_out_of(activity.as_str())))
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }
    }

    ///
    /// Project the graph onto a group of activities
    ///
    /// Edges inside the group are kept. Edges entering the group from outside become START
    /// edges of their target, edges leaving the group become END edges of their source.
    ///
    pub fn project(&self, group: &BTreeSet<Activity>) -> Self {
        let mut result = Self::new();
        for (activity, freq) in &self.activities {
            if group.contains(activity) {
                result.add_activity(activity.clone(), *freq);
            }
        }
        for (activity, freq) in &self.start_activities {
            if group.contains(activity) {
                result.add_start_activity(activity.clone(), *freq);
            }
        }
        for (activity, freq) in &self.end_activities {
            if group.contains(activity) {
                result.add_end_activity(activity.clone(), *freq);
            }
        }
        for ((from, to), freq) in &self.directly_follows_relations {
            match (group.contains(from), group.contains(to)) {
                (true, true) => result.add_df_relation(from.clone(), to.clone(), *freq),
                (true, false) => result.add_end_activity(from.clone(), *freq),
                (false, true) => result.add_start_activity(to.clone(), *freq),
                (false, false) => {}
            }
        }
        result
    }
}
