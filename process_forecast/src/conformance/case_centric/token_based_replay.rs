//! Token-based replay of [`EventLog`]s on [`PetriNet`]s
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use rayon::prelude::*;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::{
    event_data::case_centric::Trace,
    process_models::case_centric::petri_net::{IncidenceLists, PetriNet},
};
use crate::EventLog;

/// Maximal number of markings explored when searching for silent firing sequences
const MAX_SILENT_STATES: usize = 256;

///
/// Errors than can occur for the input of the token-based replay algorithm
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenBasedReplayError {
    /// Error if no initial marking is provided
    NoInitialMarking,
    /// Error if the no final marking is provided
    NoFinalMarking,
    /// Error if there are too many final markings are provided
    TooManyFinalMarkings,
}

impl std::fmt::Display for TokenBasedReplayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenBasedReplayError::NoInitialMarking => {
                write!(f, "No initial marking")
            }
            TokenBasedReplayError::NoFinalMarking => {
                write!(f, "No final marking")
            }
            TokenBasedReplayError::TooManyFinalMarkings => {
                write!(f, "Too many final markings")
            }
        }
    }
}

impl std::error::Error for TokenBasedReplayError {}

///
/// Token counts from the token-based replay computation
///
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TokenBasedReplayResult {
    /// Produced tokens during token-based replay
    pub produced: u64,
    /// Consumed tokens during token-based replay
    pub consumed: u64,
    /// Missing tokens during token-based replay
    pub missing: u64,
    /// Remaining tokens during token-based replay
    pub remaining: u64,
}

impl TokenBasedReplayResult {
    /// Initializes a [`TokenBasedReplayResult`]
    pub fn new() -> TokenBasedReplayResult {
        Self::default()
    }

    ///
    /// Computes the fitness from the produced, consumed, missing, and remaining tokens
    ///
    /// `1 - 0.5 * missing / consumed - 0.5 * remaining / produced`, clipped to `[0, 1]`.
    /// A ratio with a zero denominator counts as `0`.
    ///
    pub fn compute_fitness(&self) -> f64 {
        let ratio = |a: u64, b: u64| if b == 0 { 0.0 } else { a as f64 / b as f64 };
        (1.0 - 0.5 * ratio(self.missing, self.consumed)
            - 0.5 * ratio(self.remaining, self.produced))
            .clamp(0.0, 1.0)
    }

    fn add(&mut self, other: &TokenBasedReplayResult) {
        self.produced += other.produced;
        self.consumed += other.consumed;
        self.missing += other.missing;
        self.remaining += other.remaining;
    }
}

///
/// Replay outcome of a single trace
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TraceReplayResult {
    /// Case identifier of the trace
    pub case_id: String,
    /// Token counts
    pub tokens: TokenBasedReplayResult,
    /// Fitness of the trace
    pub fitness: f64,
    /// Activities of the trace without a transition in the net (skipped during replay)
    pub missing_activities: Vec<String>,
}

impl TraceReplayResult {
    /// A trace fits if it was replayed without missing or remaining tokens
    pub fn is_fitting(&self) -> bool {
        self.tokens.missing == 0 && self.tokens.remaining == 0
    }
}

///
/// Fitness of an [`EventLog`] on a [`PetriNet`]
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReplayFitness {
    /// Results per trace, in log order
    pub per_trace: Vec<TraceReplayResult>,
    /// Log fitness: mean of the per-trace fitness values (`0` for an empty log)
    pub average_trace_fitness: f64,
    /// Fitness computed from the token counts summed over all traces
    pub token_weighted_fitness: f64,
    /// Percentage (`0` to `100`) of traces replayed without missing or remaining tokens
    pub percentage_of_fitting_traces: f64,
    /// Token counts summed over all traces
    pub totals: TokenBasedReplayResult,
    /// All activities of the log that have no transition in the net
    pub missing_activities: BTreeSet<String>,
}

struct Replayer<'a> {
    lists: IncidenceLists,
    silent: Vec<usize>,
    by_label: BTreeMap<&'a str, Vec<usize>>,
    initial: Vec<u64>,
    final_marking: Vec<u64>,
}

impl<'a> Replayer<'a> {
    fn new(net: &'a PetriNet) -> Result<Self, TokenBasedReplayError> {
        let initial = net
            .initial_marking
            .as_ref()
            .ok_or(TokenBasedReplayError::NoInitialMarking)?;
        let final_marking = match net.final_markings.as_deref() {
            None | Some([]) => return Err(TokenBasedReplayError::NoFinalMarking),
            Some([m]) => m,
            Some(_) => return Err(TokenBasedReplayError::TooManyFinalMarkings),
        };
        let lists = net.incidence_lists();
        let silent = (0..net.transitions.len())
            .filter(|t| lists.silent[*t])
            .collect();
        let mut by_label: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for t in &net.transitions {
            if let Some(label) = &t.label {
                by_label.entry(label.as_str()).or_default().push(t.id().0);
            }
        }
        Ok(Self {
            lists,
            silent,
            by_label,
            initial: net.marking_to_vector(initial),
            final_marking: net.marking_to_vector(final_marking),
        })
    }

    ///
    /// Shortest sequence of silent firings leading from `tokens` to a marking
    /// satisfying `goal` (bounded by [`MAX_SILENT_STATES`] explored markings)
    ///
    fn silent_path(&self, tokens: &[u64], goal: impl Fn(&[u64]) -> bool) -> Option<Vec<usize>> {
        if goal(tokens) {
            return Some(Vec::new());
        }
        let mut visited: HashSet<Vec<u64>> = HashSet::from([tokens.to_vec()]);
        let mut queue: VecDeque<(Vec<u64>, Vec<usize>)> =
            VecDeque::from([(tokens.to_vec(), Vec::new())]);
        while let Some((marking, path)) = queue.pop_front() {
            for t in &self.silent {
                if !self.lists.is_enabled(&marking, *t) {
                    continue;
                }
                let mut next = marking.clone();
                self.lists.fire(&mut next, *t);
                if !visited.insert(next.clone()) {
                    continue;
                }
                let mut next_path = path.clone();
                next_path.push(*t);
                if goal(next.as_slice()) {
                    return Some(next_path);
                }
                if visited.len() >= MAX_SILENT_STATES {
                    return None;
                }
                queue.push_back((next, next_path));
            }
        }
        None
    }

    fn fire(&self, tokens: &mut [u64], t: usize, result: &mut TokenBasedReplayResult) {
        for (p, w) in &self.lists.pre[t] {
            if tokens[*p] < *w {
                result.missing += w - tokens[*p];
                tokens[*p] = *w;
            }
        }
        self.lists.fire(tokens, t);
        result.consumed += self.lists.consumed_by(t);
        result.produced += self.lists.produced_by(t);
    }

    fn replay_trace(&self, trace: &Trace) -> TraceReplayResult {
        let mut tokens = self.initial.clone();
        let mut result = TokenBasedReplayResult {
            produced: self.initial.iter().sum(),
            ..Default::default()
        };
        let mut missing_activities = Vec::new();

        for activity in trace.activities() {
            let Some(candidates) = self.by_label.get(activity) else {
                missing_activities.push(activity.to_string());
                continue;
            };
            let enabled = |m: &[u64]| candidates.iter().any(|t| self.lists.is_enabled(m, *t));
            if let Some(path) = self.silent_path(&tokens, enabled) {
                for t in path {
                    self.fire(&mut tokens, t, &mut result);
                }
            }
            let t = candidates
                .iter()
                .copied()
                .find(|t| self.lists.is_enabled(&tokens, *t))
                .unwrap_or(candidates[0]);
            self.fire(&mut tokens, t, &mut result);
        }

        if let Some(path) = self.silent_path(&tokens, |m| m == self.final_marking.as_slice()) {
            for t in path {
                self.fire(&mut tokens, t, &mut result);
            }
        }
        for (p, w) in self.final_marking.iter().enumerate() {
            if tokens[p] < *w {
                result.missing += w - tokens[p];
                tokens[p] = 0;
            } else {
                tokens[p] -= w;
            }
            result.consumed += w;
        }
        result.remaining = tokens.iter().sum();

        TraceReplayResult {
            case_id: trace.case_id().to_string(),
            fitness: result.compute_fitness(),
            tokens: result,
            missing_activities,
        }
    }
}

///
/// Replay every trace of the [`EventLog`] on the [`PetriNet`] and compute fitness values
///
/// For each event, a transition with the activity as label is fired. If none is enabled,
/// silent transitions are fired first where possible; otherwise the missing tokens are
/// created ("borrowed") and counted as missing. At the end of a trace, silent transitions
/// may be fired to reach the final marking, which is then consumed; all tokens left are
/// counted as remaining.
///
/// Activities without a transition are skipped and reported in
/// [`TraceReplayResult::missing_activities`].
///
/// Traces are replayed in parallel.
///
pub fn fitness(
    event_log: &EventLog,
    petri_net: &PetriNet,
) -> Result<ReplayFitness, TokenBasedReplayError> {
    let replayer = Replayer::new(petri_net)?;
    let per_trace: Vec<TraceReplayResult> = event_log
        .traces()
        .par_iter()
        .map(|trace| replayer.replay_trace(trace))
        .collect();

    let mut totals = TokenBasedReplayResult::new();
    let mut missing_activities = BTreeSet::new();
    for trace in &per_trace {
        totals.add(&trace.tokens);
        missing_activities.extend(trace.missing_activities.iter().cloned());
    }
    for activity in &missing_activities {
        warn!(
            activity = activity.as_str(),
            "Activity has no transition in the net and was skipped during replay"
        );
    }

    let (average_trace_fitness, percentage_of_fitting_traces) = if per_trace.is_empty() {
        (0.0, 0.0)
    } else {
        let n = per_trace.len() as f64;
        (
            per_trace.iter().map(|t| t.fitness).sum::<f64>() / n,
            100.0 * per_trace.iter().filter(|t| t.is_fitting()).count() as f64 / n,
        )
    };
    info!(
        traces = per_trace.len(),
        average_trace_fitness, percentage_of_fitting_traces, "Token-based replay finished"
    );

    Ok(ReplayFitness {
        average_trace_fitness,
        token_weighted_fitness: totals.compute_fitness(),
        percentage_of_fitting_traces,
        totals,
        missing_activities,
        per_trace,
    })
}

///
/// Computes the token counts of replaying the [`EventLog`], summed over all traces
///
pub fn token_based_replay(
    petri_net: &PetriNet,
    event_log: &EventLog,
) -> Result<TokenBasedReplayResult, TokenBasedReplayError> {
    fitness(event_log, petri_net).map(|f| f.totals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::process_models::case_centric::{
        petri_net::{ArcType, Marking},
        process_tree::{OperatorType, ProcessTree},
    };
    use crate::{event_log, lower};

    fn leaf(a: &str) -> ProcessTree {
        ProcessTree::leaf(Some(a.to_string()))
    }

    fn sequence_net() -> PetriNet {
        lower(&ProcessTree::operator(
            OperatorType::Sequence,
            vec![leaf("a"), leaf("b"), leaf("c")],
        ))
        .unwrap()
    }

    #[test]
    fn token_based_replay_test() {
        let mut net = PetriNet::new();
        let p1 = net.add_place();
        let p2 = net.add_place();
        let p3 = net.add_place();
        let t1 = net.add_transition(Some("a".into()));
        let t2 = net.add_transition(Some("b".into()));
        let t3 = net.add_transition(Some("c".into()));
        let t4 = net.add_transition(Some("d".into()));
        net.add_arc(ArcType::place_to_transition(p1, t1), None);
        net.add_arc(ArcType::place_to_transition(p1, t2), None);
        net.add_arc(ArcType::transition_to_place(t1, p2), None);
        net.add_arc(ArcType::transition_to_place(t2, p2), None);
        net.add_arc(ArcType::place_to_transition(p2, t3), None);
        net.add_arc(ArcType::transition_to_place(t3, p3), None);
        net.add_arc(ArcType::transition_to_place(t4, p2), None);
        net.add_arc(ArcType::place_to_transition(p2, t4), None);
        net.initial_marking = Some(Marking::from([(p1, 1)]));
        net.final_markings = Some(vec![Marking::from([(p3, 1)])]);

        let result = token_based_replay(&net, &event_log!(["a", "b", "c", "c", "d"])).unwrap();
        assert_eq!(result.produced, 6);
        assert_eq!(result.consumed, 6);
        assert_eq!(result.missing, 2);
        assert_eq!(result.remaining, 2);

        let log = event_log!(["a", "b", "c", "c", "d"], ["b", "b", "d", "b"]);
        let result_2 = token_based_replay(&net, &log).unwrap();
        assert_eq!(result_2.produced, 6 + 5);
        assert_eq!(result_2.consumed, 6 + 5);
        assert_eq!(result_2.missing, 2 + 3);
        assert_eq!(result_2.remaining, 2 + 3);
    }

    #[test]
    fn perfectly_fitting_log() {
        let log = event_log!(["a", "b", "c"], ["a", "b", "c"]);
        let result = fitness(&log, &sequence_net()).unwrap();
        assert_eq!(result.average_trace_fitness, 1.0);
        assert_eq!(result.token_weighted_fitness, 1.0);
        assert_eq!(result.percentage_of_fitting_traces, 100.0);
        assert!(result.missing_activities.is_empty());
    }

    #[test]
    fn skipped_activity_borrows_token() {
        let result = fitness(&event_log!(["a", "c"], ["a", "b", "c"]), &sequence_net()).unwrap();
        let first = &result.per_trace[0];
        assert_eq!(
            first.tokens,
            TokenBasedReplayResult {
                produced: 3,
                consumed: 3,
                missing: 1,
                remaining: 1
            }
        );
        assert!((first.fitness - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(result.per_trace[1].fitness, 1.0);
        assert!((result.average_trace_fitness - 5.0 / 6.0).abs() < 1e-9);
        assert_eq!(result.percentage_of_fitting_traces, 50.0);
    }

    #[test]
    fn silent_transitions_are_fired() {
        let tree = ProcessTree::operator(
            OperatorType::Sequence,
            vec![
                leaf("a"),
                ProcessTree::operator(
                    OperatorType::ExclusiveChoice,
                    vec![leaf("b"), ProcessTree::tau()],
                ),
                ProcessTree::operator(OperatorType::Concurrency, vec![leaf("c"), leaf("d")]),
                ProcessTree::operator(OperatorType::Loop, vec![leaf("e"), leaf("f")]),
            ],
        );
        let net = lower(&tree).unwrap();
        let log = event_log!(["a", "d", "c", "e"], ["a", "b", "c", "d", "e", "f", "e"]);
        let result = fitness(&log, &net).unwrap();
        assert_eq!(result.average_trace_fitness, 1.0);
        assert_eq!(result.totals.missing, 0);
        assert_eq!(result.totals.remaining, 0);
    }

    #[test]
    fn unknown_activities_are_flagged() {
        let result = fitness(&event_log!(["a", "x", "b", "c"]), &sequence_net()).unwrap();
        assert_eq!(result.average_trace_fitness, 1.0);
        assert_eq!(result.per_trace[0].missing_activities, vec!["x".to_string()]);
        assert_eq!(
            result.missing_activities,
            BTreeSet::from(["x".to_string()])
        );
    }

    #[test]
    fn empty_log_and_invalid_nets() {
        let result = fitness(&EventLog::default(), &sequence_net()).unwrap();
        assert_eq!(result.average_trace_fitness, 0.0);
        assert!(result.per_trace.is_empty());

        let mut net = sequence_net();
        net.initial_marking = None;
        assert_eq!(
            fitness(&EventLog::default(), &net),
            Err(TokenBasedReplayError::NoInitialMarking)
        );
        let mut net = sequence_net();
        net.final_markings = Some(vec![]);
        assert_eq!(
            fitness(&EventLog::default(), &net),
            Err(TokenBasedReplayError::NoFinalMarking)
        );
        let mut net = sequence_net();
        let fm = net.final_markings.clone().unwrap();
        net.final_markings = Some([fm.clone(), fm].concat());
        assert_eq!(
            fitness(&EventLog::default(), &net),
            Err(TokenBasedReplayError::TooManyFinalMarkings)
        );
    }
}
