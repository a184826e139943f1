//! Chain timestamp handling
//!
//! Nodes report times as ISO-8601 without a zone designator
//! (`2016-04-21T10:00:03`), meaning UTC.

use crate::error::ValidationError;
use chrono::{DateTime, NaiveDateTime, Utc};

const CHAIN_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Parse a chain timestamp, with or without a trailing `Z`.
pub fn parse_chain_time(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    let trimmed = raw.strip_suffix('Z').unwrap_or(raw);
    NaiveDateTime::parse_from_str(trimmed, CHAIN_TIME_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| ValidationError::InvalidValue {
            field: "time",
            reason: format!("{raw:?}: {e}"),
        })
}

/// Format a timestamp the way nodes do.
pub fn format_chain_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%S").to_string()
}
