//! Coordinate and timestamp parsing for loosely typed backend payloads.
//!
//! The backend serializes decimals as strings (`"41.0"`) in REST responses and
//! as plain numbers in push messages, so everything here accepts both.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

/// Parse a coordinate component from a JSON value.
///
/// Numbers and numeric strings yield `Some`. `null`, empty strings, text that
/// is not a number, `NaN` and infinities yield `None`. A `None` means
/// "unknown", not a failure worth retrying.
pub fn parse_coordinate(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_coordinate_str(s),
        _ => None,
    }
}

/// String flavour of [`parse_coordinate`].
pub fn parse_coordinate_str(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse an ISO-8601 timestamp. Offsets are honoured; naive timestamps are
/// read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// [`parse_timestamp`] for an optional JSON value (only strings are accepted).
pub fn parse_timestamp_value(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value.and_then(Value::as_str).and_then(parse_timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_numbers_and_numeric_strings() {
        assert_eq!(parse_coordinate(&json!(41.0)), Some(41.0));
        assert_eq!(parse_coordinate(&json!("28.9")), Some(28.9));
        assert_eq!(parse_coordinate(&json!(" -12.5 ")), Some(-12.5));
        assert_eq!(parse_coordinate(&json!(0)), Some(0.0));
        assert_eq!(parse_coordinate(&json!("0")), Some(0.0));
    }

    #[test]
    fn rejects_missing_and_garbage() {
        assert_eq!(parse_coordinate(&Value::Null), None);
        assert_eq!(parse_coordinate(&json!("")), None);
        assert_eq!(parse_coordinate(&json!("   ")), None);
        assert_eq!(parse_coordinate(&json!("north")), None);
        assert_eq!(parse_coordinate(&json!("NaN")), None);
        assert_eq!(parse_coordinate(&json!("inf")), None);
        assert_eq!(parse_coordinate(&json!(true)), None);
        assert_eq!(parse_coordinate(&json!([41.0])), None);
        assert_eq!(parse_coordinate(&json!({"lat": 41.0})), None);
    }

    #[test]
    fn timestamps_with_and_without_offset() {
        let with_z = parse_timestamp("2024-05-01T10:00:00Z").unwrap();
        let with_offset = parse_timestamp("2024-05-01T13:00:00+03:00").unwrap();
        assert_eq!(with_z, with_offset);

        let naive = parse_timestamp("2024-05-01T10:00:00.250").unwrap();
        assert_eq!(naive.timestamp_millis(), with_z.timestamp_millis() + 250);

        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp_value(Some(&json!(12))).is_none());
        assert!(parse_timestamp_value(None).is_none());
    }
}
