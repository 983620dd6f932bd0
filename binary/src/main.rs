use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    process::ExitCode,
    time::Instant,
};

use clap::Parser;
use process_forecast::{
    conformance::case_centric::token_based_replay::TokenBasedReplayError,
    discover, fitness, lower, run_batch,
    simulation::case_centric::{
        batch::ResultsExportError, engine::SimulationError, parameters::DurationDistribution,
    },
    BatchConfig, DataError, EventLog, EventRecord, SimulationParameters, StructuralInconsistency,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Discover a process model from a production log and forecast lead times and rejections
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Event log: JSON array or CSV file of event records
    input: PathBuf,

    /// JSON file with a `ForecastConfig`; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Noise threshold of the inductive miner (default 0.15)
    #[arg(long)]
    noise: Option<f64>,

    /// Number of simulation runs
    #[arg(long)]
    runs: Option<usize>,

    /// Number of cases per run
    #[arg(long)]
    cases: Option<usize>,

    /// Base seed of the batch
    #[arg(long)]
    seed: Option<u64>,

    /// Maximum number of worker threads
    #[arg(long)]
    workers: Option<usize>,

    /// Number of reported critical paths
    #[arg(long)]
    top: Option<usize>,

    /// Write the results table to this CSV file
    #[arg(long)]
    results_csv: Option<PathBuf>,

    /// Write the discovered Petri net (with markings) to this JSON file
    #[arg(long)]
    net_json: Option<PathBuf>,

    /// Enable debug output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

/// Pipeline configuration as read from `--config`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct ForecastConfig {
    noise_threshold: f64,
    batch: BatchConfig,
    duration_distribution: DurationDistribution,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            noise_threshold: 0.15,
            batch: BatchConfig::default(),
            duration_distribution: DurationDistribution::default(),
        }
    }
}

#[derive(Debug)]
enum ForecastError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Csv(csv::Error),
    Data(DataError),
    Structure(StructuralInconsistency),
    Replay(TokenBasedReplayError),
    Simulation(SimulationError),
    Export(ResultsExportError),
}

impl std::fmt::Display for ForecastError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::Json(e) => write!(f, "JSON error: {e}"),
            Self::Csv(e) => write!(f, "CSV error: {e}"),
            Self::Data(e) => write!(f, "Invalid event data: {e}"),
            Self::Structure(e) => write!(f, "{e}"),
            Self::Replay(e) => write!(f, "Replay failed: {e}"),
            Self::Simulation(e) => write!(f, "Simulation failed: {e}"),
            Self::Export(e) => write!(f, "Export failed: {e}"),
        }
    }
}

impl std::error::Error for ForecastError {}

macro_rules! impl_from_error {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for ForecastError {
                fn from(e: $source) -> Self {
                    Self::$variant(e)
                }
            }
        )*
    };
}

impl_from_error!(
    std::io::Error => Io,
    serde_json::Error => Json,
    csv::Error => Csv,
    DataError => Data,
    StructuralInconsistency => Structure,
    TokenBasedReplayError => Replay,
    SimulationError => Simulation,
    ResultsExportError => Export,
);

fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn read_event_log(path: &Path) -> Result<EventLog, ForecastError> {
    let file = BufReader::new(File::open(path)?);
    let records: Vec<EventRecord> = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => {
            let mut reader = csv::Reader::from_reader(file);
            reader.deserialize().collect::<Result<_, _>>()?
        }
        _ => serde_json::from_reader(file)?,
    };
    Ok(EventLog::build(records)?)
}

fn load_config(cli: &Cli) -> Result<ForecastConfig, ForecastError> {
    let mut config = match &cli.config {
        Some(path) => serde_json::from_reader(BufReader::new(File::open(path)?))?,
        None => ForecastConfig::default(),
    };
    if let Some(noise) = cli.noise {
        config.noise_threshold = noise;
    }
    let batch = &mut config.batch;
    if let Some(runs) = cli.runs {
        batch.num_runs = runs;
    }
    if let Some(cases) = cli.cases {
        batch.cases_per_run = cases;
    }
    if let Some(seed) = cli.seed {
        batch.seed = seed;
    }
    if cli.workers.is_some() {
        batch.max_workers = cli.workers;
    }
    if let Some(top) = cli.top {
        batch.critical_path_count = top;
    }
    Ok(config)
}

fn run(cli: &Cli) -> Result<(), ForecastError> {
    let config = load_config(cli)?;

    let now = Instant::now();
    let log = read_event_log(&cli.input)?;
    info!(
        cases = log.len(),
        events = log.num_events(),
        "Loaded event log in {:?}",
        now.elapsed()
    );

    let tree = discover(&log, config.noise_threshold);
    println!("Process tree: {tree}");

    let net = lower(&tree)?;
    if let Some(path) = &cli.net_json {
        std::fs::write(path, net.to_json()?)?;
        info!("Wrote Petri net to {}", path.display());
    }

    let replay = fitness(&log, &net)?;
    println!(
        "Fitness: {:.4} (token-weighted {:.4}, {:.1}% fitting traces)",
        replay.average_trace_fitness,
        replay.token_weighted_fitness,
        replay.percentage_of_fitting_traces
    );

    let params = SimulationParameters::from_log(&log)
        .with_duration_distribution(config.duration_distribution);
    let now = Instant::now();
    let result = run_batch(&net, &params, &config.batch)?;
    info!("Simulated {} runs in {:?}", config.batch.num_runs, now.elapsed());

    println!("\nSimulation results:");
    println!(
        "{:>10} {:>22} {:>23} {:>16}",
        "Simulation", "Avg_Total_Time_Minutes", "Avg_Activities_Per_Case", "Rejection_Rate_%"
    );
    for row in &result.table.rows {
        println!(
            "{:>10} {:>22.2} {:>23.2} {:>16.2}",
            row.run_index + 1,
            row.mean_case_duration,
            row.mean_activities_per_case,
            row.rejection_rate_percent
        );
    }
    if let Some(description) = result.table.describe() {
        println!("\nSummary statistics:");
        for (name, column) in [
            ("Avg_Total_Time_Minutes", description.mean_case_duration),
            ("Avg_Activities_Per_Case", description.mean_activities_per_case),
            ("Rejection_Rate_%", description.rejection_rate_percent),
        ] {
            println!(
                "{name:>23}: mean {:.2}, std {:.2}, min {:.2}, \
                 25% {:.2}, 50% {:.2}, 75% {:.2}, max {:.2}",
                column.mean,
                column.std,
                column.min,
                column.q25,
                column.median,
                column.q75,
                column.max
            );
        }
    }
    if let Some(path) = &cli.results_csv {
        result.table.export_csv(File::create(path)?)?;
        info!("Wrote results table to {}", path.display());
    }

    println!("\nCritical paths:");
    for (i, path) in result.critical_paths.iter().enumerate() {
        println!("{:>3}. {path}", i + 1);
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
