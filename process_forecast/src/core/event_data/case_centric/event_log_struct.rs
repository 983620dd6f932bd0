use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::core::event_data::timestamp_utils::{parse_timestamp, span_to_minutes};

///
/// A normalized row as supplied by the ingestion collaborator
///
/// Only `case_id`, `activity` and `start_timestamp` are required; all other fields
/// are optional. Field aliases match the column headers of typical production exports
/// (e.g., `"Case ID"`, `"Qty Completed"`).
///
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EventRecord {
    /// Case identifier
    #[serde(alias = "Case ID")]
    pub case_id: Option<String>,
    /// Activity label
    #[serde(alias = "Activity")]
    pub activity: Option<String>,
    /// Start timestamp (see [`parse_timestamp`] for accepted formats)
    #[serde(alias = "Start Timestamp")]
    pub start_timestamp: Option<String>,
    /// Completion timestamp
    #[serde(alias = "Complete Timestamp")]
    pub complete_timestamp: Option<String>,
    /// Executing resource (machine, worker, ...)
    #[serde(alias = "Resource")]
    pub resource: Option<String>,
    /// Processing span formatted as `"HH:MM"`
    #[serde(alias = "Span")]
    pub span: Option<String>,
    /// Quantity completed
    #[serde(alias = "Qty Completed")]
    pub qty_completed: Option<f64>,
    /// Quantity rejected
    #[serde(alias = "Qty Rejected")]
    pub qty_rejected: Option<f64>,
    /// Quantity ordered (work order quantity)
    #[serde(alias = "Work Order Qty")]
    pub qty_ordered: Option<f64>,
    /// Optional description of the produced part
    #[serde(alias = "Part Desc.")]
    pub part_description: Option<String>,
}

impl EventRecord {
    /// Create a record with the three required fields set
    pub fn new<S1, S2, S3>(case_id: S1, activity: S2, start_timestamp: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self {
            case_id: Some(case_id.into()),
            activity: Some(activity.into()),
            start_timestamp: Some(start_timestamp.into()),
            ..Default::default()
        }
    }

    /// Set the completion timestamp
    pub fn with_complete_timestamp<S: Into<String>>(mut self, complete_timestamp: S) -> Self {
        self.complete_timestamp = Some(complete_timestamp.into());
        self
    }

    /// Set the `"HH:MM"` span
    pub fn with_span<S: Into<String>>(mut self, span: S) -> Self {
        self.span = Some(span.into());
        self
    }

    /// Set completed, rejected and ordered quantities
    pub fn with_quantities(mut self, completed: f64, rejected: f64, ordered: f64) -> Self {
        self.qty_completed = Some(completed);
        self.qty_rejected = Some(rejected);
        self.qty_ordered = Some(ordered);
        self
    }
}

///
/// Errors for malformed or incomplete ingestion records
///
/// Rows are identified by their (zero-based) position in the input.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataError {
    /// Case identifier is missing or blank
    MissingCaseId {
        /// Row position
        row: usize,
    },
    /// Activity label is missing or blank
    MissingActivity {
        /// Row position
        row: usize,
    },
    /// Start timestamp is missing or blank
    MissingStartTimestamp {
        /// Row position
        row: usize,
    },
    /// A timestamp could not be parsed
    InvalidTimestamp {
        /// Row position
        row: usize,
        /// The raw value
        value: String,
    },
}

impl std::fmt::Display for DataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataError::MissingCaseId { row } => write!(f, "Row {row}: missing case id"),
            DataError::MissingActivity { row } => write!(f, "Row {row}: missing activity"),
            DataError::MissingStartTimestamp { row } => {
                write!(f, "Row {row}: missing start timestamp")
            }
            DataError::InvalidTimestamp { row, value } => {
                write!(f, "Row {row}: invalid timestamp '{value}'")
            }
        }
    }
}

impl std::error::Error for DataError {}

///
/// An event in a [`Trace`]
///
/// Events are immutable once recorded; they are only handed out by reference.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Event {
    /// Activity label
    pub activity: String,
    /// Start timestamp
    pub start: DateTime<FixedOffset>,
    /// Completion timestamp
    pub complete: Option<DateTime<FixedOffset>>,
    /// Executing resource
    pub resource: Option<String>,
    /// Processing duration in minutes
    pub duration_minutes: f64,
    /// Quantity completed
    pub qty_completed: f64,
    /// Quantity rejected
    pub qty_rejected: f64,
    /// Quantity ordered
    pub qty_ordered: f64,
    /// Optional description of the produced part
    pub part_description: Option<String>,
}

///
/// A trace: the events of one case, ordered by ascending start timestamp
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Trace {
    case_id: String,
    events: Vec<Event>,
}

impl Trace {
    /// Create a trace; events are sorted by start timestamp
    pub fn new<S: Into<String>>(case_id: S, mut events: Vec<Event>) -> Self {
        events.sort_by_key(|e| e.start);
        Self {
            case_id: case_id.into(),
            events,
        }
    }

    /// Case identifier
    pub fn case_id(&self) -> &str {
        &self.case_id
    }

    /// Events in execution order
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Activity labels in execution order
    pub fn activities(&self) -> impl Iterator<Item = &str> + '_ {
        self.events.iter().map(|e| e.activity.as_str())
    }

    /// Number of events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the trace contains no events
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

///
/// Event log consisting of [`Trace`]s keyed by unique case id
///
/// Built once through [`EventLog::build`] and read-only afterwards.
/// Traces are ordered by case id.
///
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EventLog {
    traces: Vec<Trace>,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl EventLog {
    ///
    /// Build an [`EventLog`] from ingestion records
    ///
    /// Records are grouped by case id and each group is sorted by start timestamp
    /// (records with equal start timestamps keep their input order).
    ///
    /// The duration of an event is taken from its `"HH:MM"` span (`0` if malformed).
    /// Without a span, the difference between completion and start timestamp is used.
    ///
    pub fn build<I>(records: I) -> Result<Self, DataError>
    where
        I: IntoIterator<Item = EventRecord>,
    {
        let mut cases: BTreeMap<String, Vec<Event>> = BTreeMap::new();
        for (row, record) in records.into_iter().enumerate() {
            let case_id = non_blank(&record.case_id).ok_or(DataError::MissingCaseId { row })?;
            let activity =
                non_blank(&record.activity).ok_or(DataError::MissingActivity { row })?;
            let start_raw = non_blank(&record.start_timestamp)
                .ok_or(DataError::MissingStartTimestamp { row })?;
            let start = parse_timestamp(start_raw, None).map_err(|_| {
                DataError::InvalidTimestamp {
                    row,
                    value: start_raw.to_string(),
                }
            })?;
            let complete = match non_blank(&record.complete_timestamp) {
                Some(raw) => Some(parse_timestamp(raw, None).map_err(|_| {
                    DataError::InvalidTimestamp {
                        row,
                        value: raw.to_string(),
                    }
                })?),
                None => None,
            };
            let duration_minutes = match (&record.span, complete) {
                (Some(span), _) => span_to_minutes(span),
                (None, Some(complete)) => {
                    ((complete - start).num_seconds() as f64 / 60.0).max(0.0)
                }
                (None, None) => 0.0,
            };

            let event = Event {
                activity: activity.to_string(),
                start,
                complete,
                resource: non_blank(&record.resource).map(str::to_string),
                duration_minutes,
                qty_completed: record.qty_completed.unwrap_or_default(),
                qty_rejected: record.qty_rejected.unwrap_or_default(),
                qty_ordered: record.qty_ordered.unwrap_or_default(),
                part_description: non_blank(&record.part_description).map(str::to_string),
            };
            cases.entry(case_id.to_string()).or_default().push(event);
        }

        let traces = cases
            .into_iter()
            .map(|(case_id, mut events)| {
                events.sort_by_key(|e| e.start);
                Trace { case_id, events }
            })
            .collect();
        Ok(Self { traces })
    }

    ///
    /// Build an [`EventLog`] from activity sequences with optional durations (in minutes)
    ///
    /// Case ids are the positions of the sequences. The first event of each case starts at
    /// the unix epoch; each following event starts when the previous one completes
    /// (or one hour later if no duration was given).
    ///
    /// See also the [`event_log!`](crate::event_log) macro.
    ///
    pub fn from_activity_sequences<S: Into<String>>(
        sequences: Vec<Vec<(S, Option<f64>)>>,
    ) -> Self {
        let traces = sequences
            .into_iter()
            .enumerate()
            .map(|(idx, seq)| {
                let mut time: DateTime<FixedOffset> = DateTime::<Utc>::UNIX_EPOCH.fixed_offset();
                let events = seq
                    .into_iter()
                    .map(|(activity, minutes)| {
                        let start = time;
                        let (complete, duration_minutes) = match minutes {
                            Some(m) => {
                                let complete = start + TimeDelta::seconds((m * 60.0) as i64);
                                (Some(complete), m)
                            }
                            None => (None, 0.0),
                        };
                        time = complete.unwrap_or(start + TimeDelta::hours(1));
                        Event {
                            activity: activity.into(),
                            start,
                            complete,
                            resource: None,
                            duration_minutes,
                            qty_completed: 0.0,
                            qty_rejected: 0.0,
                            qty_ordered: 0.0,
                            part_description: None,
                        }
                    })
                    .collect();
                Trace {
                    case_id: idx.to_string(),
                    events,
                }
            })
            .collect();
        Self { traces }
    }

    /// Collect [`Trace`]s into an [`EventLog`] (ordered by case id)
    pub fn from_traces<I: IntoIterator<Item = Trace>>(traces: I) -> Self {
        let mut traces: Vec<Trace> = traces.into_iter().collect();
        traces.sort_by(|a, b| a.case_id.cmp(&b.case_id));
        Self { traces }
    }

    /// Traces ordered by case id
    pub fn traces(&self) -> &[Trace] {
        &self.traces
    }

    /// Get the trace of a case
    pub fn trace(&self, case_id: &str) -> Option<&Trace> {
        self.traces
            .binary_search_by(|t| t.case_id.as_str().cmp(case_id))
            .ok()
            .map(|pos| &self.traces[pos])
    }

    /// Number of traces
    pub fn len(&self) -> usize {
        self.traces.len()
    }

    /// Whether the log contains no traces
    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    /// Total number of events over all traces
    pub fn num_events(&self) -> usize {
        self.traces.iter().map(Trace::len).sum()
    }

    /// All distinct activity labels
    pub fn activities(&self) -> BTreeSet<&str> {
        self.traces
            .iter()
            .flat_map(|t| t.activities())
            .collect()
    }

    /// Iterate over all events of all traces
    pub fn events(&self) -> impl Iterator<Item = &Event> + '_ {
        self.traces.iter().flat_map(|t| t.events.iter())
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
