//! Convenient Macros for creating event logs

/// Create an [`EventLog`].
///
/// Each trace is denoted by a bracketed, comma-separated list of activities. An activity can
/// optionally be followed by `=> minutes` to give it a duration.
///
/// Case ids are assigned by position (`"0"`, `"1"`, ...). The first event of each trace
/// starts at the unix epoch and every following event starts when its predecessor completes
/// (or one hour later, if no duration was given).
///
/// # Examples
///
/// ```rust
/// use process_forecast::event_log;
///
/// let log = event_log!(["a", "b", "c"], ["a", "c", "b"]);
/// assert_eq!(log.len(), 2);
///
/// let timed = event_log!(["a" => 10.0, "b" => 20.0, "c" => 30.0]);
/// assert_eq!(timed.traces()[0].events()[2].duration_minutes, 30.0);
/// ```
///
/// [`EventLog`]: crate::core::event_data::case_centric::EventLog
#[macro_export]
macro_rules! event_log {
    ( $( [ $( $activity:expr $(=> $minutes:expr)? ),* $(,)? ] ),* $(,)? ) => {{
        #[allow(unused_mut)]
        let sequences: Vec<Vec<(String, Option<f64>)>> = vec![
            $(
                vec![
                    $(
                        {
                            #[allow(unused_mut, unused_assignments)]
                            let mut minutes: Option<f64> = None;
                            $( minutes = Some($minutes as f64); )?
                            (String::from($activity), minutes)
                        }
                    ),*
                ]
            ),*
        ];
        $crate::core::event_data::case_centric::EventLog::from_activity_sequences(sequences)
    }};
}
