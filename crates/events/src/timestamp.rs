//! Timestamp normalization for captured rows.
//!
//! Log-capture connectors encode `TIMESTAMP` columns either as an integer
//! count of microseconds since the Unix epoch or as an ISO-8601 string. Two
//! string shapes are accepted, both carrying `Z` or an explicit offset:
//! - RFC 3339 with nanosecond precision (`2024-05-01T08:00:00.123456789Z`)
//! - an ISO date-time with fractional seconds and a `+hh:mm` offset
//!   (`2024-05-01T05:00:00.123456-03:00`)
//!
//! Anything else, including a date-time without an offset, is a
//! [`DecodeError::InvalidTimestamp`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::{DecodeError, Result};

const OFFSET_ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f%:z";

/// Normalizes a JSON timestamp value to UTC.
pub fn parse(value: &Value) -> Result<DateTime<Utc>> {
    match value {
        Value::Number(number) => {
            let micros = number
                .as_i64()
                .ok_or_else(|| DecodeError::InvalidTimestamp(number.to_string()))?;
            from_epoch_micros(micros)
        }
        Value::String(text) => parse_str(text),
        other => Err(DecodeError::InvalidTimestamp(other.to_string())),
    }
}

/// Converts epoch microseconds to UTC.
pub fn from_epoch_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| DecodeError::InvalidTimestamp(micros.to_string()))
}

/// Converts epoch milliseconds to UTC.
pub fn from_epoch_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| DecodeError::InvalidTimestamp(millis.to_string()))
}

fn parse_str(text: &str) -> Result<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Ok(parsed.with_timezone(&Utc));
    }
    DateTime::parse_from_str(text, OFFSET_ISO_FORMAT)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| DecodeError::InvalidTimestamp(text.to_string()))
}

/// `deserialize_with` adapter for row structs.
pub(crate) fn deserialize<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    parse(&value).map_err(serde::de::Error::custom)
}
