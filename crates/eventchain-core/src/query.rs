//! Translation of raw search parameters into an [`EventFilter`].
//!
//! Accepted date forms, all interpreted in UTC unless an offset is given:
//!
//! | Input                          | Meaning                     |
//! |--------------------------------|-----------------------------|
//! | `2024-01-01T12:00:00.000Z`     | RFC 3339, any offset        |
//! | `2024-01-01T12:00[:00[.000]]`  | HTML `datetime-local`       |
//! | `2024-01-01`                   | midnight at the start of day|
//!
//! Empty or whitespace-only strings mean "absent".

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use eventchain_types::{EventFilter, SearchParams};

use crate::error::ValidationError;

const LOCAL_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// Validate `params` and build the equivalent filter.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidTimestamp`] if a date cannot be
/// parsed, or [`ValidationError::InvertedRange`] if the start is after the
/// end.
pub fn parse_search(params: &SearchParams) -> Result<EventFilter, ValidationError> {
    let filter = EventFilter {
        event_type: non_empty(params.event_type.as_deref()),
        source_app_id: non_empty(params.source_app_id.as_deref()),
        start_time: parse_bound("startDate", params.start_date.as_deref())?,
        end_time: parse_bound("endDate", params.end_date.as_deref())?,
    };
    check_range(&filter)?;
    Ok(filter)
}

/// Reject a filter whose start bound is after its end bound.
///
/// # Errors
///
/// Returns [`ValidationError::InvertedRange`].
pub fn check_range(filter: &EventFilter) -> Result<(), ValidationError> {
    if let (Some(start), Some(end)) = (filter.start_time, filter.end_time)
        && start > end
    {
        return Err(ValidationError::InvertedRange);
    }
    Ok(())
}

/// Parse one date string in any accepted form.
///
/// Returns `None` if the input matches none of them.
pub fn parse_time(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(input) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in LOCAL_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn parse_bound(
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<DateTime<Utc>>, ValidationError> {
    let Some(raw) = value.filter(|v| !v.trim().is_empty()) else {
        return Ok(None);
    };
    parse_time(raw)
        .map(Some)
        .ok_or_else(|| ValidationError::InvalidTimestamp {
            field,
            value: raw.to_owned(),
        })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(ToOwned::to_owned)
}
