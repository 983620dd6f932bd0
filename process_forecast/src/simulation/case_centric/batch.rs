use std::io::Write;

use itertools::Itertools;
use rayon::prelude::*;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    critical_path::{critical_paths, CriticalPath},
    engine::{simulate_with_cancellation, SimulationConfig, SimulationError, SyntheticLog},
    parameters::SimulationParameters,
    random_source::derive_seed,
};
use crate::{core::process_models::case_centric::petri_net::PetriNet, CancellationToken};

///
/// Configuration of a batch of simulation runs
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BatchConfig {
    /// Number of independent runs
    pub num_runs: usize,
    /// Number of cases per run
    pub cases_per_run: usize,
    /// Base seed; run seeds are derived from it
    pub seed: u64,
    /// Maximum number of worker threads (`None`: rayon's global pool)
    pub max_workers: Option<usize>,
    /// Index of the run whose longest traces are reported
    pub critical_path_run: usize,
    /// Number of reported critical paths
    pub critical_path_count: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            num_runs: 20,
            cases_per_run: 500,
            seed: 0,
            max_workers: None,
            critical_path_run: 0,
            critical_path_count: 5,
        }
    }
}

impl BatchConfig {
    /// Serialize config to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
    /// Deserialize config from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

///
/// Aggregated statistics of one simulation run
///
/// Statistics only cover cases that reached the final marking with at least one event.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RunSummary {
    /// Index of the run in the batch (zero-based)
    pub run_index: usize,
    /// Mean case duration in minutes
    pub mean_case_duration: f64,
    /// Mean number of events per case
    pub mean_activities_per_case: f64,
    /// Total rejected divided by total completed quantity, in percent
    pub rejection_rate_percent: f64,
    /// Number of completed cases
    pub completed: usize,
    /// Number of deadlocked cases
    pub deadlocked: usize,
    /// Fraction of deadlocked cases
    pub deadlock_rate: f64,
}

///
/// Summarize a run; `None` if it has no completed case with at least one event
///
/// Duration and activity means only cover completed cases with at least one event.
///
pub fn summarize_run(run_index: usize, synthetic_log: &SyntheticLog) -> Option<RunSummary> {
    let completed: Vec<_> = synthetic_log.completed_traces().collect();
    let non_empty: Vec<_> = completed
        .iter()
        .copied()
        .filter(|t| !t.events.is_empty())
        .collect();
    if non_empty.is_empty() {
        return None;
    }
    let n = non_empty.len() as f64;
    let num_events: usize = non_empty.iter().map(|t| t.events.len()).sum();
    let (qty_completed, qty_rejected) = non_empty
        .iter()
        .copied()
        .flat_map(|t| &t.events)
        .fold((0u64, 0u64), |(c, r), e| (c + e.qty_completed, r + e.qty_rejected));
    let deadlocked = synthetic_log.metadata.deadlocked;
    Some(RunSummary {
        run_index,
        mean_case_duration: non_empty.iter().map(|t| t.duration()).sum::<f64>() / n,
        mean_activities_per_case: num_events as f64 / n,
        rejection_rate_percent: if qty_completed > 0 {
            100.0 * qty_rejected as f64 / qty_completed as f64
        } else {
            0.0
        },
        completed: completed.len(),
        deadlocked,
        deadlock_rate: deadlocked as f64 / synthetic_log.len() as f64,
    })
}

///
/// Descriptive statistics of one column of a [`ResultsTable`]
///
/// Quartiles are linearly interpolated; the standard deviation is the sample
/// standard deviation (`0` for a single value).
///
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnSummary {
    /// Number of values
    pub count: usize,
    /// Mean
    pub mean: f64,
    /// Sample standard deviation
    pub std: f64,
    /// Minimum
    pub min: f64,
    /// First quartile
    pub q25: f64,
    /// Median
    pub median: f64,
    /// Third quartile
    pub q75: f64,
    /// Maximum
    pub max: f64,
}

impl ColumnSummary {
    /// Summarize `values`; `None` if there are none
    pub fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let sorted: Vec<f64> = values.iter().copied().sorted_by(f64::total_cmp).collect();
        let n = sorted.len();
        let mean = sorted.iter().sum::<f64>() / n as f64;
        let std = if n > 1 {
            (sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
        } else {
            0.0
        };
        let quantile = |q: f64| {
            let pos = q * (n - 1) as f64;
            let lower = pos.floor() as usize;
            let upper = pos.ceil() as usize;
            sorted[lower] + (sorted[upper] - sorted[lower]) * (pos - lower as f64)
        };
        Some(Self {
            count: n,
            mean,
            std,
            min: sorted[0],
            q25: quantile(0.25),
            median: quantile(0.5),
            q75: quantile(0.75),
            max: sorted[n - 1],
        })
    }
}

///
/// [`ColumnSummary`] of each column of a [`ResultsTable`]
///
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResultsDescription {
    /// Mean case duration column
    pub mean_case_duration: ColumnSummary,
    /// Mean activities per case column
    pub mean_activities_per_case: ColumnSummary,
    /// Rejection rate column
    pub rejection_rate_percent: ColumnSummary,
}

/// Error while exporting a [`ResultsTable`]
#[derive(Debug)]
pub enum ResultsExportError {
    /// IO error during writing
    Io(std::io::Error),
    /// CSV writing error
    Csv(csv::Error),
}

impl std::fmt::Display for ResultsExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::Csv(e) => write!(f, "CSV error: {e}"),
        }
    }
}

impl std::error::Error for ResultsExportError {}
impl From<std::io::Error> for ResultsExportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
impl From<csv::Error> for ResultsExportError {
    fn from(e: csv::Error) -> Self {
        Self::Csv(e)
    }
}

///
/// One [`RunSummary`] per non-empty run, ordered by run index
///
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResultsTable {
    /// Summaries of non-empty runs
    pub rows: Vec<RunSummary>,
    /// Indices of runs that were skipped because they were empty
    pub skipped_runs: Vec<usize>,
}

impl ResultsTable {
    /// Descriptive statistics of all columns; `None` if the table has no rows
    pub fn describe(&self) -> Option<ResultsDescription> {
        let column = |f: fn(&RunSummary) -> f64| {
            ColumnSummary::of(&self.rows.iter().map(f).collect::<Vec<_>>())
        };
        Some(ResultsDescription {
            mean_case_duration: column(|r| r.mean_case_duration)?,
            mean_activities_per_case: column(|r| r.mean_activities_per_case)?,
            rejection_rate_percent: column(|r| r.rejection_rate_percent)?,
        })
    }

    ///
    /// Write the table as CSV, one row per run
    ///
    /// Columns: `Simulation` (one-based run number), `Avg_Total_Time_Minutes`,
    /// `Avg_Activities_Per_Case` and `Rejection_Rate_%`.
    ///
    pub fn export_csv<W: Write>(&self, writer: W) -> Result<(), ResultsExportError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record([
            "Simulation",
            "Avg_Total_Time_Minutes",
            "Avg_Activities_Per_Case",
            "Rejection_Rate_%",
        ])?;
        for row in &self.rows {
            csv_writer.write_record([
                (row.run_index + 1).to_string(),
                row.mean_case_duration.to_string(),
                row.mean_activities_per_case.to_string(),
                row.rejection_rate_percent.to_string(),
            ])?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

///
/// Results of [`run_batch`]
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BatchResult {
    /// Per-run summaries
    pub table: ResultsTable,
    /// Longest traces of the designated run
    pub critical_paths: Vec<CriticalPath>,
}

///
/// Run `config.num_runs` independent simulations and aggregate them
///
/// Runs execute in parallel (bounded by `config.max_workers`); results are merged
/// by run index, so the output does not depend on completion order.
/// Empty runs are skipped with a warning.
///
pub fn run_batch(
    petri_net: &PetriNet,
    params: &SimulationParameters,
    config: &BatchConfig,
) -> Result<BatchResult, SimulationError> {
    run_batch_with_cancellation(petri_net, params, config, &CancellationToken::new())
}

///
/// Like [`run_batch`], checking `cancellation` at every firing step
///
pub fn run_batch_with_cancellation(
    petri_net: &PetriNet,
    params: &SimulationParameters,
    config: &BatchConfig,
    cancellation: &CancellationToken,
) -> Result<BatchResult, SimulationError> {
    if config.critical_path_run >= config.num_runs {
        return Err(SimulationError::InvalidParameter(format!(
            "Critical path run {} is out of range for {} runs",
            config.critical_path_run, config.num_runs
        )));
    }
    params.validate()?;
    info!(
        runs = config.num_runs,
        cases_per_run = config.cases_per_run,
        seed = config.seed,
        "Starting simulation batch"
    );

    let execute = || {
        (0..config.num_runs)
            .into_par_iter()
            .map(|run_index| {
                let run_config = SimulationConfig::new(
                    config.cases_per_run,
                    derive_seed(config.seed, run_index as u64),
                );
                let synthetic_log =
                    simulate_with_cancellation(petri_net, params, &run_config, cancellation)?;
                let summary = summarize_run(run_index, &synthetic_log);
                debug!(
                    run = run_index,
                    completed = synthetic_log.metadata.completed,
                    deadlocked = synthetic_log.metadata.deadlocked,
                    "Finished simulation run"
                );
                let paths = (run_index == config.critical_path_run)
                    .then(|| critical_paths(&synthetic_log, config.critical_path_count));
                Ok((run_index, summary, paths))
            })
            .collect::<Result<Vec<_>, SimulationError>>()
    };
    let runs = match config.max_workers {
        Some(workers) => rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| SimulationError::WorkerPool(e.to_string()))?
            .install(execute)?,
        None => execute()?,
    };

    let mut table = ResultsTable::default();
    let mut paths = Vec::new();
    for (run_index, summary, run_paths) in runs {
        match summary {
            Some(summary) => table.rows.push(summary),
            None => {
                warn!(run = run_index, "Simulation run produced no events, skipping");
                table.skipped_runs.push(run_index);
            }
        }
        if let Some(run_paths) = run_paths {
            paths = run_paths;
        }
    }
    info!(
        runs = table.rows.len(),
        skipped = table.skipped_runs.len(),
        "Simulation batch finished"
    );
    Ok(BatchResult {
        table,
        critical_paths: paths,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::process_models::case_centric::process_tree::{OperatorType, ProcessTree},
        lower,
        simulation::case_centric::parameters::DurationDistribution,
    };

    fn sequence_net() -> PetriNet {
        lower(&ProcessTree::operator(
            OperatorType::Sequence,
            vec![
                ProcessTree::leaf(Some("A".into())),
                ProcessTree::leaf(Some("B".into())),
            ],
        ))
        .unwrap()
    }

    fn small_config() -> BatchConfig {
        BatchConfig {
            num_runs: 4,
            cases_per_run: 25,
            seed: 5,
            max_workers: Some(2),
            critical_path_run: 1,
            critical_path_count: 3,
        }
    }

    #[test]
    fn fixed_durations() {
        let params = SimulationParameters::new([("A".into(), 10.0), ("B".into(), 5.0)].into())
            .with_duration_distribution(DurationDistribution::Fixed);
        let result = run_batch(&sequence_net(), &params, &small_config()).unwrap();
        assert_eq!(result.table.rows.len(), 4);
        assert!(result.table.skipped_runs.is_empty());
        let indices: Vec<usize> = result.table.rows.iter().map(|r| r.run_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        for row in &result.table.rows {
            assert_eq!(row.mean_case_duration, 15.0);
            assert_eq!(row.mean_activities_per_case, 2.0);
            assert_eq!(row.rejection_rate_percent, 0.0);
            assert_eq!(row.completed, 25);
            assert_eq!(row.deadlock_rate, 0.0);
        }
        assert_eq!(result.critical_paths.len(), 3);
        // all cases take equally long, so generation order is kept
        let ids: Vec<&str> = result.critical_paths.iter().map(|p| p.case_id.as_str()).collect();
        assert_eq!(ids, vec!["0", "1", "2"]);

        let description = result.table.describe().unwrap();
        assert_eq!(description.mean_case_duration.count, 4);
        assert_eq!(description.mean_case_duration.std, 0.0);
        assert_eq!(description.mean_case_duration.median, 15.0);
    }

    #[test]
    fn reproducible_regardless_of_workers() {
        let params = SimulationParameters {
            rejection_rate_mean: 0.1,
            avg_qty_completed: 20.0,
            ..SimulationParameters::new([("A".into(), 10.0), ("B".into(), 5.0)].into())
        };
        let config = small_config();
        let first = run_batch(&sequence_net(), &params, &config).unwrap();
        let second = run_batch(
            &sequence_net(),
            &params,
            &BatchConfig {
                max_workers: None,
                ..config
            },
        )
        .unwrap();
        assert_eq!(first, second);
        assert!(first.table.rows.iter().any(|r| r.rejection_rate_percent > 0.0));
    }

    #[test]
    fn empty_runs_are_skipped() {
        let net = lower(&ProcessTree::tau()).unwrap();
        let result = run_batch(&net, &SimulationParameters::default(), &small_config()).unwrap();
        assert!(result.table.rows.is_empty());
        assert_eq!(result.table.skipped_runs, vec![0, 1, 2, 3]);
        assert!(result.critical_paths.is_empty());
        assert_eq!(result.table.describe(), None);
    }

    #[test]
    fn skipped_activities_do_not_lower_means() {
        let net = lower(&ProcessTree::operator(
            OperatorType::ExclusiveChoice,
            vec![ProcessTree::leaf(Some("a".into())), ProcessTree::tau()],
        ))
        .unwrap();
        let params = SimulationParameters::new([("a".into(), 10.0)].into())
            .with_duration_distribution(DurationDistribution::Fixed);
        let config = BatchConfig {
            num_runs: 2,
            cases_per_run: 20,
            critical_path_count: 20,
            ..small_config()
        };
        let result = run_batch(&net, &params, &config).unwrap();
        for row in &result.table.rows {
            assert_eq!(row.mean_case_duration, 10.0);
            assert_eq!(row.mean_activities_per_case, 1.0);
            assert_eq!(row.completed, 20);
        }
        assert!(!result.critical_paths.is_empty());
        assert!(result
            .critical_paths
            .iter()
            .all(|p| p.activities == ["a"] && p.duration_minutes == 10.0));
    }

    #[test]
    fn invalid_critical_path_run() {
        let config = BatchConfig {
            critical_path_run: 4,
            ..small_config()
        };
        assert!(matches!(
            run_batch(&sequence_net(), &SimulationParameters::default(), &config),
            Err(SimulationError::InvalidParameter(_))
        ));
    }

    #[test]
    fn column_summary() {
        let summary = ColumnSummary::of(&[4.0, 1.0, 3.0, 2.0]).unwrap();
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.max, 4.0);
        assert_eq!(summary.mean, 2.5);
        assert_eq!(summary.median, 2.5);
        assert_eq!(summary.q25, 1.75);
        assert_eq!(summary.q75, 3.25);
        assert!((summary.std - 1.2909944487358056).abs() < 1e-12);
        assert_eq!(ColumnSummary::of(&[]), None);
    }

    #[test]
    fn csv_export() {
        let table = ResultsTable {
            rows: vec![RunSummary {
                run_index: 0,
                mean_case_duration: 60.0,
                mean_activities_per_case: 3.0,
                rejection_rate_percent: 1.5,
                completed: 10,
                deadlocked: 0,
                deadlock_rate: 0.0,
            }],
            skipped_runs: vec![],
        };
        let mut out = Vec::new();
        table.export_csv(&mut out).unwrap();
        let expected = concat!(
            "Simulation,Avg_Total_Time_Minutes,Avg_Activities_Per_Case,Rejection_Rate_%\n",
            "1,60,3,1.5\n"
        );
        assert_eq!(String::from_utf8(out).unwrap(), expected);
    }
}
