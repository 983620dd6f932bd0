use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, TimeDelta};
use rayon::prelude::*;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    parameters::SimulationParameters,
    random_source::{derive_seed, RandomSource, SeededRandomSource},
};
use crate::{
    core::{
        event_data::case_centric::{Event, EventLog, Trace},
        process_models::case_centric::petri_net::{IncidenceLists, PetriNet},
    },
    utils::cancellation::{CancellationToken, Cancelled},
};

///
/// Errors that prevent a simulation from running
///
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationError {
    /// The net has no initial marking
    NoInitialMarking,
    /// The net has no final marking
    NoFinalMarking,
    /// A simulation parameter is out of range
    InvalidParameter(String),
    /// The worker pool for parallel runs could not be created
    WorkerPool(String),
    /// Simulation was stopped through its [`CancellationToken`]
    Cancelled,
}

impl std::fmt::Display for SimulationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimulationError::NoInitialMarking => {
                write!(f, "Petri net has no initial marking")
            }
            SimulationError::NoFinalMarking => write!(f, "Petri net has no final marking"),
            SimulationError::InvalidParameter(reason) => {
                write!(f, "Invalid simulation parameter: {reason}")
            }
            SimulationError::WorkerPool(reason) => {
                write!(f, "Could not create worker pool: {reason}")
            }
            SimulationError::Cancelled => write!(f, "Simulation was cancelled"),
        }
    }
}

impl std::error::Error for SimulationError {}

impl From<Cancelled> for SimulationError {
    fn from(_: Cancelled) -> Self {
        SimulationError::Cancelled
    }
}

///
/// Configuration of a single simulation run
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of cases to simulate
    pub num_cases: usize,
    /// Seed of the run; the seed of each case is derived from it
    pub seed: u64,
    /// Upper bound on transition firings per case
    ///
    /// Cases exceeding it (e.g., in a loop that never exits) are flagged as
    /// [`CaseOutcome::Deadlocked`].
    pub max_firings_per_case: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            num_cases: 500,
            seed: 0,
            max_firings_per_case: 10_000,
        }
    }
}

impl SimulationConfig {
    /// Create a config for `num_cases` cases with the given seed
    pub fn new(num_cases: usize, seed: u64) -> Self {
        Self {
            num_cases,
            seed,
            ..Default::default()
        }
    }
}

/// How a simulated case terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum CaseOutcome {
    /// The final marking was reached
    Completed,
    /// No transition was enabled (or the firing limit was hit) before reaching the final marking
    Deadlocked,
}

///
/// A simulated activity execution
///
/// Times are minutes relative to the start of the case.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SyntheticEvent {
    /// Activity label
    pub activity: String,
    /// Start (in minutes)
    pub start: f64,
    /// Sampled duration (in minutes)
    pub duration: f64,
    /// End (in minutes)
    pub end: f64,
    /// Sampled completed quantity
    pub qty_completed: u64,
    /// Sampled rejected quantity
    pub qty_rejected: u64,
}

///
/// A simulated case
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SyntheticTrace {
    /// Case identifier
    pub case_id: String,
    /// Emitted events, ordered by start
    pub events: Vec<SyntheticEvent>,
    /// How the case terminated
    pub outcome: CaseOutcome,
}

impl SyntheticTrace {
    /// Duration in minutes: end of the last event minus start of the first (`0` without events)
    pub fn duration(&self) -> f64 {
        match (self.events.first(), self.events.last()) {
            (Some(first), Some(last)) => last.end - first.start,
            _ => 0.0,
        }
    }

    /// Whether the case reached the final marking
    pub fn is_completed(&self) -> bool {
        self.outcome == CaseOutcome::Completed
    }

    /// Activity labels in execution order
    pub fn activities(&self) -> impl Iterator<Item = &str> + '_ {
        self.events.iter().map(|e| e.activity.as_str())
    }
}

///
/// Counts collected during a simulation run
///
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RunMetadata {
    /// Number of simulated cases
    pub cases: usize,
    /// Cases that reached the final marking
    pub completed: usize,
    /// Cases that got stuck
    pub deadlocked: usize,
    /// Total number of fired transitions (including silent ones)
    pub transition_firings: usize,
    /// Number of firings per activity label
    pub activity_firings: BTreeMap<String, usize>,
}

///
/// Output of a simulation run: synthetic traces (in case order) plus [`RunMetadata`]
///
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SyntheticLog {
    /// Simulated cases, in the order they were generated
    pub traces: Vec<SyntheticTrace>,
    /// Counts of the run
    pub metadata: RunMetadata,
}

impl SyntheticLog {
    /// Number of simulated cases
    pub fn len(&self) -> usize {
        self.traces.len()
    }

    /// Whether no case was simulated
    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    /// Traces that reached the final marking
    pub fn completed_traces(&self) -> impl Iterator<Item = &SyntheticTrace> + '_ {
        self.traces.iter().filter(|t| t.is_completed())
    }

    ///
    /// Convert to an [`EventLog`], anchoring all cases at `base`
    ///
    /// The ordered quantity of an event is set to its completed quantity.
    ///
    pub fn to_event_log(&self, base: DateTime<FixedOffset>) -> EventLog {
        let at = |minutes: f64| base + TimeDelta::milliseconds((minutes * 60_000.0).round() as i64);
        EventLog::from_traces(self.traces.iter().map(|trace| {
            let events = trace
                .events
                .iter()
                .map(|e| Event {
                    activity: e.activity.clone(),
                    start: at(e.start),
                    complete: Some(at(e.end)),
                    resource: None,
                    duration_minutes: e.duration,
                    qty_completed: e.qty_completed as f64,
                    qty_rejected: e.qty_rejected as f64,
                    qty_ordered: e.qty_completed as f64,
                    part_description: None,
                })
                .collect();
            Trace::new(trace.case_id.clone(), events)
        }))
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

///
/// Plays the token game of a [`PetriNet`], one case at a time
///
/// Holds the net's incidence lists and markings as dense token vectors; cases only
/// share this read-only state.
///
#[derive(Debug)]
pub struct Simulator<'a> {
    params: &'a SimulationParameters,
    lists: IncidenceLists,
    labels: Vec<Option<&'a str>>,
    initial: Vec<u64>,
    final_markings: Vec<Vec<u64>>,
    max_firings: usize,
}

impl<'a> Simulator<'a> {
    /// Prepare the simulation of `net`
    pub fn new(
        net: &'a PetriNet,
        params: &'a SimulationParameters,
    ) -> Result<Self, SimulationError> {
        params.validate()?;
        let initial = net
            .initial_marking
            .as_ref()
            .ok_or(SimulationError::NoInitialMarking)?;
        let final_markings: Vec<Vec<u64>> = net
            .final_markings
            .iter()
            .flatten()
            .map(|m| net.marking_to_vector(m))
            .collect();
        if final_markings.is_empty() {
            return Err(SimulationError::NoFinalMarking);
        }
        let mut labels = vec![None; net.transitions.len()];
        for t in &net.transitions {
            if let Some(slot) = labels.get_mut(t.id().0) {
                *slot = t.label.as_deref();
            }
        }
        Ok(Self {
            params,
            lists: net.incidence_lists(),
            labels,
            initial: net.marking_to_vector(initial),
            final_markings,
            max_firings: SimulationConfig::default().max_firings_per_case,
        })
    }

    /// Limit the number of firings per case
    pub fn with_max_firings(mut self, max_firings: usize) -> Self {
        self.max_firings = max_firings;
        self
    }

    ///
    /// Simulate one case
    ///
    /// Returns the synthetic trace and the number of fired transitions.
    ///
    pub fn simulate_case<R: RandomSource + ?Sized>(
        &self,
        case_id: String,
        rng: &mut R,
        cancellation: &CancellationToken,
    ) -> Result<(SyntheticTrace, usize), Cancelled> {
        let rejection_rate = self.params.sample_case_rejection_rate(rng);
        let mut tokens = self.initial.clone();
        let mut clock = 0.0;
        let mut events = Vec::new();
        let mut firings = 0;

        let outcome = loop {
            cancellation.check()?;
            if self.final_markings.iter().any(|m| *m == tokens) {
                break CaseOutcome::Completed;
            }
            let enabled = self.lists.enabled_transitions(&tokens);
            if enabled.is_empty() || firings >= self.max_firings {
                break CaseOutcome::Deadlocked;
            }
            let t = enabled[rng.choose_index(enabled.len())];
            self.lists.fire(&mut tokens, t);
            firings += 1;

            if let Some(activity) = self.labels[t] {
                let duration = self.params.sample_duration(activity, rng);
                let (qty_completed, qty_rejected) =
                    self.params.sample_quality(rejection_rate, rng);
                events.push(SyntheticEvent {
                    activity: activity.to_string(),
                    start: clock,
                    duration,
                    end: clock + duration,
                    qty_completed,
                    qty_rejected,
                });
                clock += duration;
            }
        };

        Ok((
            SyntheticTrace {
                case_id,
                events,
                outcome,
            },
            firings,
        ))
    }
}

///
/// Simulate `config.num_cases` independent cases of a [`PetriNet`]
///
/// Case `i` draws from its own random source seeded with a seed derived from
/// `config.seed` and `i`, so the result does not depend on scheduling.
///
/// ```rust
/// use std::collections::BTreeMap;
/// use process_forecast::{
///     discover, event_log, lower, simulate, SimulationConfig, SimulationParameters,
/// };
///
/// let log = event_log!(["a" => 10, "b" => 20]);
/// let net = lower(&discover(&log, 0.0)).unwrap();
/// let params = SimulationParameters::from_log(&log);
/// let synthetic = simulate(&net, &params, &SimulationConfig::new(10, 42)).unwrap();
/// assert_eq!(synthetic.metadata.completed, 10);
/// ```
pub fn simulate(
    petri_net: &PetriNet,
    params: &SimulationParameters,
    config: &SimulationConfig,
) -> Result<SyntheticLog, SimulationError> {
    simulate_with_cancellation(petri_net, params, config, &CancellationToken::new())
}

///
/// Like [`simulate`], checking `cancellation` at every firing step
///
pub fn simulate_with_cancellation(
    petri_net: &PetriNet,
    params: &SimulationParameters,
    config: &SimulationConfig,
    cancellation: &CancellationToken,
) -> Result<SyntheticLog, SimulationError> {
    let simulator =
        Simulator::new(petri_net, params)?.with_max_firings(config.max_firings_per_case);
    let cases: Vec<(SyntheticTrace, usize)> = (0..config.num_cases)
        .into_par_iter()
        .map(|i| {
            let mut rng = SeededRandomSource::new(derive_seed(config.seed, i as u64));
            simulator.simulate_case(i.to_string(), &mut rng, cancellation)
        })
        .collect::<Result<_, Cancelled>>()?;

    let mut metadata = RunMetadata {
        cases: cases.len(),
        ..Default::default()
    };
    let mut traces = Vec::with_capacity(cases.len());
    for (trace, firings) in cases {
        metadata.transition_firings += firings;
        match trace.outcome {
            CaseOutcome::Completed => metadata.completed += 1,
            CaseOutcome::Deadlocked => metadata.deadlocked += 1,
        }
        for activity in trace.activities() {
            *metadata
                .activity_firings
                .entry(activity.to_string())
                .or_default() += 1;
        }
        traces.push(trace);
    }
    if metadata.deadlocked > 0 {
        info!(
            deadlocked = metadata.deadlocked,
            cases = metadata.cases,
            "Some simulated cases did not reach the final marking"
        );
    }
    debug!(
        seed = config.seed,
        cases = metadata.cases,
        firings = metadata.transition_firings,
        "Simulation run finished"
    );
    Ok(SyntheticLog { traces, metadata })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::process_models::case_centric::{
            petri_net::{ArcType, Marking},
            process_tree::{OperatorType, ProcessTree},
        },
        lower,
        simulation::case_centric::parameters::DurationDistribution,
    };

    /// Always picks the first enabled transition and returns means
    struct FirstChoice;

    impl RandomSource for FirstChoice {
        fn choose_index(&mut self, _n: usize) -> usize {
            0
        }
        fn exponential(&mut self, mean: f64) -> f64 {
            mean
        }
        fn normal(&mut self, mean: f64, _std_dev: f64) -> f64 {
            mean
        }
        fn poisson(&mut self, lambda: f64) -> u64 {
            lambda.round() as u64
        }
    }

    fn leaf(a: &str) -> ProcessTree {
        ProcessTree::leaf(Some(a.to_string()))
    }

    fn params(means: &[(&str, f64)]) -> SimulationParameters {
        SimulationParameters::new(
            means
                .iter()
                .map(|(a, m)| (a.to_string(), *m))
                .collect(),
        )
        .with_duration_distribution(DurationDistribution::Fixed)
    }

    #[test]
    fn sequential_case() {
        let net = lower(&ProcessTree::operator(
            OperatorType::Sequence,
            vec![leaf("A"), leaf("B"), leaf("C")],
        ))
        .unwrap();
        let params = params(&[("A", 10.0), ("B", 20.0), ("C", 30.0)]);
        let simulator = Simulator::new(&net, &params).unwrap();
        let (trace, firings) = simulator
            .simulate_case("c".into(), &mut FirstChoice, &CancellationToken::new())
            .unwrap();
        assert_eq!(firings, 3);
        assert_eq!(trace.outcome, CaseOutcome::Completed);
        assert_eq!(trace.activities().collect::<Vec<_>>(), vec!["A", "B", "C"]);
        let starts: Vec<f64> = trace.events.iter().map(|e| e.start).collect();
        assert_eq!(starts, vec![0.0, 10.0, 30.0]);
        assert_eq!(trace.duration(), 60.0);
        assert!(trace.events.iter().all(|e| e.qty_completed == 1 && e.qty_rejected == 0));
    }

    #[test]
    fn silent_transitions_do_not_advance_clock() {
        // split and join of the concurrency operator are silent
        let net = lower(&ProcessTree::operator(
            OperatorType::Concurrency,
            vec![leaf("a"), ProcessTree::tau()],
        ))
        .unwrap();
        let params = params(&[("a", 5.0)]);
        let simulator = Simulator::new(&net, &params).unwrap();
        let (trace, firings) = simulator
            .simulate_case("c".into(), &mut FirstChoice, &CancellationToken::new())
            .unwrap();
        assert_eq!(firings, 4);
        assert_eq!(trace.events.len(), 1);
        assert_eq!(trace.duration(), 5.0);
    }

    #[test]
    fn choices_are_random() {
        let net = lower(&ProcessTree::operator(
            OperatorType::ExclusiveChoice,
            vec![leaf("a"), leaf("b")],
        ))
        .unwrap();
        let log = simulate(&net, &params(&[]), &SimulationConfig::new(200, 1)).unwrap();
        assert_eq!(log.metadata.completed, 200);
        assert_eq!(log.metadata.transition_firings, 200);
        assert!(log.metadata.activity_firings["a"] > 0);
        assert!(log.metadata.activity_firings["b"] > 0);
    }

    #[test]
    fn deadlock_and_firing_limit() {
        // p0 -a-> p1, but the final marking is p2
        let mut net = PetriNet::new();
        let p0 = net.add_place();
        let p1 = net.add_place();
        let p2 = net.add_place();
        let a = net.add_transition(Some("a".into()));
        net.add_arc(ArcType::place_to_transition(p0, a), None);
        net.add_arc(ArcType::transition_to_place(a, p1), None);
        net.initial_marking = Some(Marking::from([(p0, 1)]));
        net.final_markings = Some(vec![Marking::from([(p2, 1)])]);
        let log = simulate(&net, &params(&[]), &SimulationConfig::new(3, 0)).unwrap();
        assert_eq!(log.metadata.deadlocked, 3);
        assert!(log.traces.iter().all(|t| t.events.len() == 1));

        // a self-loop that never reaches the final marking
        let mut net = PetriNet::new();
        let p0 = net.add_place();
        let p1 = net.add_place();
        let a = net.add_transition(Some("a".into()));
        net.add_arc(ArcType::place_to_transition(p0, a), None);
        net.add_arc(ArcType::transition_to_place(a, p0), None);
        net.initial_marking = Some(Marking::from([(p0, 1)]));
        net.final_markings = Some(vec![Marking::from([(p1, 1)])]);
        let config = SimulationConfig {
            num_cases: 2,
            seed: 0,
            max_firings_per_case: 50,
        };
        let log = simulate(&net, &params(&[]), &config).unwrap();
        assert_eq!(log.metadata.deadlocked, 2);
        assert_eq!(log.metadata.transition_firings, 100);
        assert_eq!(log.traces[0].events.len(), 50);
    }

    #[test]
    fn reproducible_with_seed() {
        let net = lower(&ProcessTree::operator(
            OperatorType::Loop,
            vec![leaf("a"), leaf("b")],
        ))
        .unwrap();
        let params = SimulationParameters::new([("a".to_string(), 3.0)].into());
        let first = simulate(&net, &params, &SimulationConfig::new(50, 9)).unwrap();
        let second = simulate(&net, &params, &SimulationConfig::new(50, 9)).unwrap();
        assert_eq!(first, second);
        let other = simulate(&net, &params, &SimulationConfig::new(50, 10)).unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn invalid_input() {
        let mut net = lower(&leaf("a")).unwrap();
        let mut invalid = params(&[]);
        invalid.avg_qty_completed = f64::INFINITY;
        assert!(matches!(
            simulate(&net, &invalid, &SimulationConfig::default()),
            Err(SimulationError::InvalidParameter(_))
        ));

        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(
            simulate_with_cancellation(&net, &params(&[]), &SimulationConfig::new(5, 0), &token),
            Err(SimulationError::Cancelled)
        );

        net.final_markings = Some(vec![]);
        assert_eq!(
            simulate(&net, &params(&[]), &SimulationConfig::default()),
            Err(SimulationError::NoFinalMarking)
        );
        net.initial_marking = None;
        assert_eq!(
            simulate(&net, &params(&[]), &SimulationConfig::default()),
            Err(SimulationError::NoInitialMarking)
        );
    }

    #[test]
    fn synthetic_log_to_event_log() {
        let net = lower(&ProcessTree::operator(
            OperatorType::Sequence,
            vec![leaf("A"), leaf("B")],
        ))
        .unwrap();
        let synthetic = simulate(
            &net,
            &params(&[("A", 1.5), ("B", 2.0)]),
            &SimulationConfig::new(12, 3),
        )
        .unwrap();
        let base = DateTime::parse_from_rfc3339("2024-01-01T08:00:00+00:00").unwrap();
        let log = synthetic.to_event_log(base);
        assert_eq!(log.len(), 12);
        let trace = log.trace("11").unwrap();
        assert_eq!(trace.activities().collect::<Vec<_>>(), vec!["A", "B"]);
        assert_eq!(
            trace.events()[1].start.to_rfc3339(),
            "2024-01-01T08:01:30+00:00"
        );
        assert_eq!(trace.events()[1].duration_minutes, 2.0);
    }
}
