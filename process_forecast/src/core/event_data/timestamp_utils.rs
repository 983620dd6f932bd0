//! Shared parsing utilities for ingested event records

use chrono::{DateTime, FixedOffset, NaiveDateTime};

/// Parse a timestamp string to `DateTime<FixedOffset>`, trying multiple formats.
///
/// Naive timestamps (without an offset) are interpreted as UTC.
///
/// # Supported Formats (in order of precedence)
/// 1. Custom format (if provided) - tries both with timezone and as naive (assumes UTC)
/// 2. RFC3339: `2023-10-06T09:30:21+00:00`
/// 3. ISO 8601 with offset (no colon): `2023-10-06T09:30:21+0000`
/// 4. RFC2822: `Fri, 06 Oct 2023 09:30:21 +0000`
/// 5. Naive datetime with fractional seconds: `2023-10-06 09:30:21.890421`
/// 6. Naive ISO 8601 (optionally fractional): `2023-10-06T09:30:21`
/// 7. Naive datetime without seconds: `2023-10-06 09:30`
/// 8. Naive with UTC suffix: `2023-10-06 09:30:21 UTC`
pub fn parse_timestamp<'a>(
    time: &'a str,
    custom_format: Option<&'a str>,
) -> Result<DateTime<FixedOffset>, &'a str> {
    let time = time.trim();
    if let Some(date_format) = custom_format {
        if let Ok(dt) = DateTime::parse_from_str(time, date_format) {
            return Ok(dt);
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(time, date_format) {
            return Ok(dt.and_utc().into());
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(time) {
        return Ok(dt);
    }

    if let Ok(dt) = DateTime::parse_from_str(time, "%Y-%m-%dT%H:%M:%S%z") {
        return Ok(dt);
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(time) {
        return Ok(dt);
    }

    // Spreadsheet exports usually look like "2023-10-06 09:30:21.890421"
    if let Ok(dt) = NaiveDateTime::parse_from_str(time, "%F %T%.f") {
        return Ok(dt.and_utc().into());
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(time, "%FT%T%.f") {
        return Ok(dt.and_utc().into());
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(time, "%F %H:%M") {
        return Ok(dt.and_utc().into());
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(time, "%F %T UTC") {
        return Ok(dt.and_utc().into());
    }

    tracing::debug!("Failed to parse timestamp: {time}");
    Err("Unexpected timestamp format")
}

///
/// Convert a `"HH:MM"` span into minutes
///
/// Malformed spans (missing colon, non-numeric parts, negative values) yield `0.0`.
///
/// ```rust
/// use process_forecast::core::event_data::timestamp_utils::span_to_minutes;
///
/// assert_eq!(span_to_minutes("01:30"), 90.0);
/// assert_eq!(span_to_minutes("garbage"), 0.0);
/// ```
pub fn span_to_minutes(span: &str) -> f64 {
    let Some((hours, minutes)) = span.trim().split_once(':') else {
        return 0.0;
    };
    match (hours.trim().parse::<u32>(), minutes.trim().parse::<u32>()) {
        (Ok(h), Ok(m)) => f64::from(h) * 60.0 + f64::from(m),
        _ => 0.0,
    }
}
