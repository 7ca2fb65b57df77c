//! UTC boundary — timestamp parsing and range types.
//!
//! Every timestamp inside the system is a `DateTime<Utc>`. Text inputs
//! (CSV files, config) cross this boundary through [`parse_utc`], which
//! rejects naive values instead of silently assuming UTC.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced at the UTC boundary.
#[derive(Debug, Error)]
pub enum TimeError {
    #[error("naive timestamp '{0}' rejected: an explicit UTC offset is required")]
    NaiveTimestamp(String),
    #[error("unparseable timestamp '{input}': {source}")]
    Unparseable {
        input: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Parse an RFC 3339 timestamp, normalizing any offset to UTC.
///
/// A value with no offset at all ("2024-01-02T09:00:00") is a validation
/// error, never assumed to be UTC.
pub fn parse_utc(input: &str) -> Result<DateTime<Utc>, TimeError> {
    match DateTime::<FixedOffset>::parse_from_rfc3339(input) {
        Ok(ts) => Ok(ts.with_timezone(&Utc)),
        Err(source) => {
            // Distinguish "no offset" from garbage for a clearer error.
            if chrono::NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S").is_ok()
                || chrono::NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M:%S").is_ok()
            {
                Err(TimeError::NaiveTimestamp(input.to_string()))
            } else {
                Err(TimeError::Unparseable {
                    input: input.to_string(),
                    source,
                })
            }
        }
    }
}

/// Inclusive UTC time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// A range with `end < start` holds no instants.
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_explicit_utc() {
        let ts = parse_utc("2024-01-02T09:00:00Z").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-01-02T09:00:00+00:00");
    }

    #[test]
    fn normalizes_offset_to_utc() {
        let ts = parse_utc("2024-01-02T09:00:00+02:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-01-02T07:00:00+00:00");
    }

    #[test]
    fn rejects_naive_timestamp() {
        let err = parse_utc("2024-01-02T09:00:00").unwrap_err();
        assert!(matches!(err, TimeError::NaiveTimestamp(_)));
    }

    #[test]
    fn rejects_garbage() {
        let err = parse_utc("yesterday-ish").unwrap_err();
        assert!(matches!(err, TimeError::Unparseable { .. }));
    }

    #[test]
    fn range_contains_is_inclusive() {
        let start = parse_utc("2024-01-01T00:00:00Z").unwrap();
        let end = parse_utc("2024-01-31T00:00:00Z").unwrap();
        let range = DateRange::new(start, end);
        assert!(range.contains(start));
        assert!(range.contains(end));
        assert!(!range.contains(end + chrono::Duration::seconds(1)));
        assert!(!range.is_empty());
        assert!(DateRange::new(end, start).is_empty());
    }
}
