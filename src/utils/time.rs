//! Timestamp normalization
//!
//! Fragments report time in whatever shape the producing service used: RFC 3339
//! strings, naive ISO strings, or epoch numbers in seconds, milliseconds,
//! microseconds, or nanoseconds. Everything is normalized to unix nanoseconds.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

/// Epoch values at or above these thresholds are read in the finer unit
const NANOS_THRESHOLD: f64 = 1e17;
const MICROS_THRESHOLD: f64 = 1e14;
const MILLIS_THRESHOLD: f64 = 1e11;

/// A timestamp before normalization
#[derive(Debug, Clone, PartialEq)]
pub enum TimeValue {
    DateTime(DateTime<Utc>),
    /// Epoch number in an unknown unit, resolved by magnitude
    Epoch(f64),
    Text(String),
}

impl TimeValue {
    /// Read a JSON value as a timestamp candidate
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().map(TimeValue::Epoch),
            Value::String(s) if !s.trim().is_empty() => Some(TimeValue::Text(s.clone())),
            _ => None,
        }
    }

    /// Normalize to unix nanoseconds, `None` if unparseable or before the epoch
    pub fn to_unix_nanos(&self) -> Option<u64> {
        match self {
            TimeValue::DateTime(dt) => datetime_nanos(dt),
            TimeValue::Epoch(n) => epoch_nanos(*n),
            TimeValue::Text(s) => text_nanos(s),
        }
    }

    /// Render back to JSON for metadata
    pub fn to_json(&self) -> Value {
        match self {
            TimeValue::DateTime(dt) => Value::String(dt.to_rfc3339()),
            TimeValue::Epoch(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            TimeValue::Text(s) => Value::String(s.clone()),
        }
    }
}

impl From<DateTime<Utc>> for TimeValue {
    fn from(dt: DateTime<Utc>) -> Self {
        TimeValue::DateTime(dt)
    }
}

/// Normalize a raw JSON timestamp to unix nanoseconds
pub fn to_unix_nanos(value: &Value) -> Option<u64> {
    let nanos = TimeValue::from_json(value).and_then(|t| t.to_unix_nanos());
    if nanos.is_none() && !value.is_null() {
        tracing::debug!("Skipping unparseable timestamp: {}", value);
    }
    nanos
}

fn datetime_nanos(dt: &DateTime<Utc>) -> Option<u64> {
    dt.timestamp_nanos_opt().and_then(|n| u64::try_from(n).ok())
}

fn epoch_nanos(n: f64) -> Option<u64> {
    if !n.is_finite() || n < 0.0 {
        return None;
    }
    let nanos = if n >= NANOS_THRESHOLD {
        n
    } else if n >= MICROS_THRESHOLD {
        n * 1e3
    } else if n >= MILLIS_THRESHOLD {
        n * 1e6
    } else {
        n * 1e9
    };
    if nanos > u64::MAX as f64 {
        return None;
    }
    Some(nanos.round() as u64)
}

fn text_nanos(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return datetime_nanos(&dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return datetime_nanos(&naive.and_utc());
        }
    }
    s.parse::<f64>().ok().and_then(epoch_nanos)
}

/// Current time in unix nanoseconds
pub fn now_nanos() -> u64 {
    datetime_nanos(&Utc::now()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const T: u64 = 1_700_000_000_000_000_000;

    #[test]
    fn test_epoch_units_by_magnitude() {
        assert_eq!(to_unix_nanos(&json!(1_700_000_000)), Some(T));
        assert_eq!(to_unix_nanos(&json!(1_700_000_000_000u64)), Some(T));
        assert_eq!(to_unix_nanos(&json!(1_700_000_000_000_000u64)), Some(T));
        assert_eq!(to_unix_nanos(&json!(T)), Some(T));
        assert_eq!(
            to_unix_nanos(&json!(1_700_000_000.5)),
            Some(T + 500_000_000)
        );
    }

    #[test]
    fn test_iso_strings() {
        assert_eq!(to_unix_nanos(&json!("2023-11-14T22:13:20Z")), Some(T));
        assert_eq!(to_unix_nanos(&json!("2023-11-14T23:13:20+01:00")), Some(T));
        assert_eq!(
            to_unix_nanos(&json!("2023-11-14T22:13:20.250")),
            Some(T + 250_000_000)
        );
        assert_eq!(to_unix_nanos(&json!("1700000000000")), Some(T));
    }

    #[test]
    fn test_unparseable_values() {
        assert_eq!(to_unix_nanos(&json!("yesterday")), None);
        assert_eq!(to_unix_nanos(&json!(-5)), None);
        assert_eq!(to_unix_nanos(&json!(null)), None);
        assert_eq!(to_unix_nanos(&json!({"t": 1})), None);
    }

    #[test]
    fn test_datetime_value() {
        let dt = DateTime::parse_from_rfc3339("2023-11-14T22:13:20Z")
            .unwrap()
            .with_timezone(&Utc);
        let value = TimeValue::from(dt);
        assert_eq!(value.to_unix_nanos(), Some(T));
        assert_eq!(value.to_json(), json!("2023-11-14T22:13:20+00:00"));
    }
}
