use std::fs::File;

use chrono::DateTime;

use crate::{
    critical_paths, discover, event_log, fitness, lower, run_batch,
    simulation::case_centric::parameters::DurationDistribution, simulate, BatchConfig, EventLog,
    EventRecord, SimulationConfig, SimulationParameters,
    utils::test_utils::get_test_data_path,
};

fn production_sample() -> EventLog {
    let path = get_test_data_path().join("production_sample.json");
    let records: Vec<EventRecord> = serde_json::from_reader(File::open(path).unwrap()).unwrap();
    EventLog::build(records).unwrap()
}

fn sequential_log() -> EventLog {
    event_log!(
        ["A" => 10, "B" => 20, "C" => 30],
        ["A" => 10, "B" => 20, "C" => 30],
        ["A" => 10, "B" => 20, "C" => 30],
    )
}

#[test]
fn production_sample_pipeline() {
    let log = production_sample();
    assert_eq!(log.len(), 6);
    assert_eq!(log.num_events(), 24);

    let tree = discover(&log, 0.15);
    assert_eq!(
        tree.to_string(),
        "->( 'Cut', 'Weld', X( 'Paint', 'Polish' ), 'Inspect' )"
    );
    let net = lower(&tree).unwrap();
    let replay = fitness(&log, &net).unwrap();
    assert_eq!(replay.average_trace_fitness, 1.0);
    assert_eq!(replay.percentage_of_fitting_traces, 100.0);
    assert!(replay.missing_activities.is_empty());

    let params = SimulationParameters::from_log(&log);
    assert_eq!(params.mean_duration("Weld"), 67.5);
    assert_eq!(params.rejection_rate_mean, 0.005);

    let config = BatchConfig {
        num_runs: 3,
        cases_per_run: 40,
        seed: 7,
        ..Default::default()
    };
    let result = run_batch(&net, &params, &config).unwrap();
    assert_eq!(result.table.rows.len(), 3);
    assert!(result
        .table
        .rows
        .iter()
        .all(|r| r.mean_activities_per_case == 4.0 && r.deadlocked == 0));
    assert_eq!(result.critical_paths.len(), 5);
    for pair in result.critical_paths.windows(2) {
        assert!(pair[0].duration_minutes >= pair[1].duration_minutes);
    }
    for path in &result.critical_paths {
        assert_eq!(path.activities.first().map(String::as_str), Some("Cut"));
        assert_eq!(path.activities.last().map(String::as_str), Some("Inspect"));
    }

    let mut csv = Vec::new();
    result.table.export_csv(&mut csv).unwrap();
    assert_eq!(String::from_utf8(csv).unwrap().lines().count(), 4);
}

#[test]
fn sequential_log_is_rediscovered_and_forecast() {
    let log = sequential_log();
    let tree = discover(&log, 0.0);
    assert_eq!(tree.to_string(), "->( 'A', 'B', 'C' )");
    let net = lower(&tree).unwrap();
    assert_eq!(fitness(&log, &net).unwrap().average_trace_fitness, 1.0);

    let fixed = SimulationParameters::from_log(&log)
        .with_duration_distribution(DurationDistribution::Fixed);
    let synthetic = simulate(&net, &fixed, &SimulationConfig::new(100, 1)).unwrap();
    assert_eq!(synthetic.metadata.completed, 100);
    assert_eq!(synthetic.metadata.deadlocked, 0);
    assert!(synthetic.traces.iter().all(|t| t.duration() == 60.0));

    let exponential = SimulationParameters::from_log(&log);
    let synthetic = simulate(&net, &exponential, &SimulationConfig::new(100, 2)).unwrap();
    assert_eq!(synthetic.metadata.deadlocked, 0);
    let mean = synthetic.traces.iter().map(|t| t.duration()).sum::<f64>() / 100.0;
    assert!((mean - 60.0).abs() < 20.0, "mean case duration {mean}");

    let paths = critical_paths(&synthetic, 5);
    assert_eq!(paths.len(), 5);
    assert!(paths.iter().all(|p| p.activities == ["A", "B", "C"]));
}

#[test]
fn synthetic_log_replays_on_its_model() {
    let log = production_sample();
    let net = lower(&discover(&log, 0.0)).unwrap();
    let synthetic = simulate(
        &net,
        &SimulationParameters::from_log(&log),
        &SimulationConfig::new(30, 11),
    )
    .unwrap();
    let base = DateTime::parse_from_rfc3339("2024-06-01T06:00:00+02:00").unwrap();
    let replay = fitness(&synthetic.to_event_log(base), &net).unwrap();
    assert_eq!(replay.per_trace.len(), 30);
    assert_eq!(replay.average_trace_fitness, 1.0);
    assert_eq!(replay.token_weighted_fitness, 1.0);
}
