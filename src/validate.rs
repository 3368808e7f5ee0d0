//! Input validation for extraction runs.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::error::{ExtractError, Result};

/// Parse an ISO date (`YYYY-MM-DD`) or datetime. Naive values are UTC.
pub fn parse_date(value: &str, field_name: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt.and_utc());
    }

    Err(ExtractError::Validation(format!(
        "Invalid {}: '{}'. Expected ISO format (YYYY-MM-DD)",
        field_name, value
    )))
}

/// Validated bounds of an extraction window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Parse both bounds and require `start < end` when both are given.
pub fn validate_date_range(start: Option<&str>, end: Option<&str>) -> Result<DateRange> {
    let start = start.map(|s| parse_date(s, "start_date")).transpose()?;
    let end = end.map(|s| parse_date(s, "end_date")).transpose()?;

    if let (Some(s), Some(e)) = (start, end) {
        if s >= e {
            return Err(ExtractError::Validation(format!(
                "Invalid date range: start_date ({}) must be before end_date ({})",
                s.date_naive(),
                e.date_naive()
            )));
        }
    }

    Ok(DateRange { start, end })
}
