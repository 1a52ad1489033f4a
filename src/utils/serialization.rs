// src/utils/serialization.rs
//! JSON helpers for the ledger wire format.
//!
//! The ledger node encodes 64-bit integers as decimal strings and
//! timestamps as seconds or microseconds since the epoch. These helpers
//! accept both the string and the number form.

use crate::error::{CredentialError, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Serializes a value to a JSON string.
pub fn serialize<T: Serialize>(data: &T) -> std::result::Result<String, serde_json::Error> {
    serde_json::to_string(data)
}

/// Deserializes a value from a JSON string.
pub fn deserialize<'a, T: Deserialize<'a>>(data: &'a str) -> std::result::Result<T, serde_json::Error> {
    serde_json::from_str(data)
}

/// Decodes a JSON value into `T`, tagging failures as ledger decoding errors.
pub fn decode_value<T: DeserializeOwned>(value: Value, what: &str) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| CredentialError::LedgerUnavailable(format!("malformed {what}: {e}")))
}

/// Reads a u64 carried either as a JSON number or a decimal string.
pub fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Converts a ledger timestamp to UTC. Values above 10^12 are treated as
/// microseconds, anything smaller as seconds.
pub fn ledger_timestamp(raw: u64) -> Option<DateTime<Utc>> {
    if raw > 1_000_000_000_000 {
        let secs = (raw / 1_000_000) as i64;
        let nanos = ((raw % 1_000_000) * 1_000) as u32;
        Utc.timestamp_opt(secs, nanos).single()
    } else {
        Utc.timestamp_opt(raw as i64, 0).single()
    }
}

/// serde adapter for u64 fields encoded as strings or numbers.
pub fn u64_from_string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    value_as_u64(&value).ok_or_else(|| serde::de::Error::custom(format!("expected u64, got {value}")))
}

/// serde adapter for ledger timestamps (0 means "not set").
pub fn optional_ledger_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Null => Ok(None),
        other => {
            let raw = value_as_u64(&other)
                .ok_or_else(|| serde::de::Error::custom(format!("expected timestamp, got {other}")))?;
            Ok(if raw == 0 { None } else { ledger_timestamp(raw) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_as_u64_accepts_both_forms() {
        assert_eq!(value_as_u64(&json!("42")), Some(42));
        assert_eq!(value_as_u64(&json!(42)), Some(42));
        assert_eq!(value_as_u64(&json!("x")), None);
        assert_eq!(value_as_u64(&json!(true)), None);
    }

    #[test]
    fn test_ledger_timestamp_units() {
        let seconds = ledger_timestamp(1_700_000_000).unwrap();
        let micros = ledger_timestamp(1_700_000_000_000_000).unwrap();
        assert_eq!(seconds, micros);
    }

    #[derive(Deserialize)]
    struct Row {
        #[serde(deserialize_with = "u64_from_string_or_number")]
        id: u64,
        #[serde(default, deserialize_with = "optional_ledger_timestamp")]
        at: Option<DateTime<Utc>>,
    }

    #[test]
    fn test_row_adapters() {
        let row: Row = serde_json::from_value(json!({ "id": "9", "at": "0" })).unwrap();
        assert_eq!(row.id, 9);
        assert!(row.at.is_none());
        let row: Row = serde_json::from_value(json!({ "id": 9, "at": 1_700_000_000 })).unwrap();
        assert!(row.at.is_some());
    }
}
