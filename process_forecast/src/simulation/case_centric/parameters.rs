use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{engine::SimulationError, random_source::RandomSource};
use crate::EventLog;

///
/// Distribution family of sampled activity durations
///
/// All variants are parameterized by the mean duration of the activity.
///
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type")]
pub enum DurationDistribution {
    /// Exponential distribution
    #[default]
    Exponential,
    /// Always the mean
    Fixed,
    /// Normal distribution (clipped at `0`) with standard deviation
    /// `coefficient_of_variation * mean`
    Normal {
        /// Ratio of standard deviation to mean
        coefficient_of_variation: f64,
    },
}

///
/// Derived global statistics that drive a simulation
///
/// Immutable once constructed; the same parameters are shared by all simulated cases.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SimulationParameters {
    /// Mean duration (in minutes) per activity
    pub activity_duration_means: BTreeMap<String, f64>,
    /// Mean duration (in minutes) for activities without an entry
    pub default_activity_duration: f64,
    /// Mean completed quantity per activity execution
    pub avg_qty_completed: f64,
    /// Global rejection rate (rejected per ordered quantity)
    pub rejection_rate_mean: f64,
    /// Distribution of activity durations around their mean
    #[serde(default)]
    pub duration_distribution: DurationDistribution,
}

impl Default for SimulationParameters {
    fn default() -> Self {
        Self {
            activity_duration_means: BTreeMap::new(),
            default_activity_duration: 0.0,
            avg_qty_completed: 1.0,
            rejection_rate_mean: 0.0,
            duration_distribution: DurationDistribution::default(),
        }
    }
}

impl SimulationParameters {
    /// Create parameters from per-activity mean durations (in minutes)
    pub fn new(activity_duration_means: BTreeMap<String, f64>) -> Self {
        Self {
            activity_duration_means,
            ..Default::default()
        }
    }

    ///
    /// Derive parameters from a historical [`EventLog`]
    ///
    /// - Mean duration per activity (and over all events as the default)
    /// - Rejection rate: total rejected divided by total ordered quantity
    ///   (`0` if nothing was ordered)
    /// - Mean completed quantity per event (`1` if the log records no completed quantities)
    ///
    pub fn from_log(event_log: &EventLog) -> Self {
        let mut durations: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        let (mut total_duration, mut total_completed, mut total_rejected, mut total_ordered) =
            (0.0, 0.0, 0.0, 0.0);
        let mut num_events = 0;
        for event in event_log.events() {
            let (sum, count) = durations.entry(event.activity.clone()).or_default();
            *sum += event.duration_minutes;
            *count += 1;
            total_duration += event.duration_minutes;
            total_completed += event.qty_completed;
            total_rejected += event.qty_rejected;
            total_ordered += event.qty_ordered;
            num_events += 1;
        }

        let avg_qty_completed = if num_events > 0 && total_completed > 0.0 {
            total_completed / num_events as f64
        } else {
            1.0
        };
        Self {
            activity_duration_means: durations
                .into_iter()
                .map(|(activity, (sum, count))| (activity, sum / count as f64))
                .collect(),
            default_activity_duration: if num_events > 0 {
                total_duration / num_events as f64
            } else {
                0.0
            },
            avg_qty_completed,
            rejection_rate_mean: if total_ordered > 0.0 {
                total_rejected / total_ordered
            } else {
                0.0
            },
            duration_distribution: DurationDistribution::default(),
        }
    }

    /// Use another [`DurationDistribution`]
    pub fn with_duration_distribution(
        mut self,
        duration_distribution: DurationDistribution,
    ) -> Self {
        self.duration_distribution = duration_distribution;
        self
    }

    /// Mean duration (in minutes) of an activity
    pub fn mean_duration(&self, activity: &str) -> f64 {
        self.activity_duration_means
            .get(activity)
            .copied()
            .unwrap_or(self.default_activity_duration)
    }

    /// Sample the duration (in minutes) of an activity execution
    pub fn sample_duration<R: RandomSource + ?Sized>(&self, activity: &str, rng: &mut R) -> f64 {
        let mean = self.mean_duration(activity);
        match self.duration_distribution {
            DurationDistribution::Exponential => rng.exponential(mean),
            DurationDistribution::Fixed => mean,
            DurationDistribution::Normal {
                coefficient_of_variation,
            } => rng
                .normal(mean, coefficient_of_variation * mean)
                .max(0.0),
        }
    }

    /// Sample the rejection rate of one case: `Normal(mean, 0.5 * mean)`, clipped at `0`
    pub fn sample_case_rejection_rate<R: RandomSource + ?Sized>(&self, rng: &mut R) -> f64 {
        rng.normal(self.rejection_rate_mean, 0.5 * self.rejection_rate_mean)
            .max(0.0)
    }

    ///
    /// Sample completed and rejected quantity of an activity execution
    ///
    /// Completed: `Normal(avg, 0.2 * avg)`, truncated and at least `1`.
    /// Rejected: `Poisson(rejection_rate * completed)`.
    ///
    pub fn sample_quality<R: RandomSource + ?Sized>(
        &self,
        rejection_rate: f64,
        rng: &mut R,
    ) -> (u64, u64) {
        let completed = rng
            .normal(self.avg_qty_completed, 0.2 * self.avg_qty_completed)
            .trunc()
            .max(1.0) as u64;
        let rejected = rng.poisson(rejection_rate * completed as f64);
        (completed, rejected)
    }

    /// Check that all means and rates are finite and non-negative
    pub fn validate(&self) -> Result<(), SimulationError> {
        let invalid = |name: &str, value: f64| {
            if value.is_finite() && value >= 0.0 {
                Ok(())
            } else {
                Err(SimulationError::InvalidParameter(format!(
                    "{name} must be finite and non-negative, got {value}"
                )))
            }
        };
        for (activity, mean) in &self.activity_duration_means {
            invalid(&format!("Mean duration of '{activity}'"), *mean)?;
        }
        invalid("Default activity duration", self.default_activity_duration)?;
        invalid("Average completed quantity", self.avg_qty_completed)?;
        invalid("Rejection rate", self.rejection_rate_mean)?;
        if let DurationDistribution::Normal {
            coefficient_of_variation,
        } = self.duration_distribution
        {
            invalid("Coefficient of variation", coefficient_of_variation)?;
        }
        Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{simulation::case_centric::random_source::SeededRandomSource, EventRecord};

    fn sample_log() -> EventLog {
        EventLog::build(vec![
            EventRecord::new("1", "Cut", "2024-01-01 08:00:00")
                .with_span("00:10")
                .with_quantities(10.0, 1.0, 10.0),
            EventRecord::new("1", "Weld", "2024-01-01 08:10:00")
                .with_span("00:30")
                .with_quantities(10.0, 0.0, 10.0),
            EventRecord::new("2", "Cut", "2024-01-01 09:00:00")
                .with_span("00:20")
                .with_quantities(20.0, 3.0, 30.0),
        ])
        .unwrap()
    }

    #[test]
    fn derived_from_log() {
        let params = SimulationParameters::from_log(&sample_log());
        assert_eq!(params.mean_duration("Cut"), 15.0);
        assert_eq!(params.mean_duration("Weld"), 30.0);
        assert_eq!(params.mean_duration("Unknown"), 20.0);
        assert_eq!(params.rejection_rate_mean, 0.08);
        assert!((params.avg_qty_completed - 40.0 / 3.0).abs() < 1e-9);
        assert_eq!(params.validate(), Ok(()));
    }

    #[test]
    fn defaults_without_quantities() {
        let params = SimulationParameters::from_log(&crate::event_log!(["a" => 5]));
        assert_eq!(params.avg_qty_completed, 1.0);
        assert_eq!(params.rejection_rate_mean, 0.0);
        assert_eq!(params.mean_duration("a"), 5.0);
    }

    #[test]
    fn sampling() {
        let params = SimulationParameters::new(BTreeMap::from([("a".to_string(), 10.0)]))
            .with_duration_distribution(DurationDistribution::Fixed);
        let mut rng = SeededRandomSource::new(3);
        assert_eq!(params.sample_duration("a", &mut rng), 10.0);
        assert_eq!(params.sample_duration("b", &mut rng), 0.0);
        // no rejections without a rejection rate
        assert_eq!(params.sample_case_rejection_rate(&mut rng), 0.0);
        for _ in 0..50 {
            let (completed, rejected) = params.sample_quality(0.0, &mut rng);
            assert!(completed >= 1);
            assert_eq!(rejected, 0);
        }
    }

    #[test]
    fn invalid_parameters_and_json() {
        let mut params = SimulationParameters::from_log(&sample_log());
        let parsed = SimulationParameters::from_json(&params.to_json().unwrap()).unwrap();
        assert_eq!(parsed, params);

        params.rejection_rate_mean = -1.0;
        assert!(matches!(
            params.validate(),
            Err(SimulationError::InvalidParameter(_))
        ));
        params.rejection_rate_mean = 0.0;
        params.duration_distribution = DurationDistribution::Normal {
            coefficient_of_variation: f64::NAN,
        };
        assert!(params.validate().is_err());
    }
}
