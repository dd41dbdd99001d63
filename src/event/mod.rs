//! Click events as they arrive and after normalization.

mod validate;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use snafu::prelude::*;

use crate::error::{DecodeError, EmptyPayloadSnafu, JsonSnafu, NotAnObjectSnafu};

pub use validate::{Validator, parse_timestamp};

/// A decoded stream message: field name to JSON value, no schema enforced.
pub type RawEvent = Map<String, Value>;

pub const USER_ID: &str = "user_id";
pub const EVENT_TYPE: &str = "event_type";
pub const TIMESTAMP: &str = "timestamp";
pub const INGESTION_TIMESTAMP: &str = "ingestion_timestamp";

/// Decode a message payload into a raw event.
pub fn decode(payload: Option<&[u8]>) -> Result<RawEvent, DecodeError> {
    let payload = payload.filter(|p| !p.is_empty()).context(EmptyPayloadSnafu)?;
    match serde_json::from_slice::<Value>(payload).context(JsonSnafu)? {
        Value::Object(map) => Ok(map),
        _ => NotAnObjectSnafu.fail(),
    }
}

/// An event that passed validation.
///
/// Immutable once appended to a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    pub user_id: Value,
    /// Lower-cased.
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub ingestion_timestamp: DateTime<Utc>,
    /// Every other field, in arrival order.
    pub attributes: Map<String, Value>,
}

impl NormalizedEvent {
    /// Render the canonical mapping form.
    pub fn to_raw(&self) -> RawEvent {
        let mut raw = Map::with_capacity(self.attributes.len() + 4);
        raw.insert(USER_ID.to_string(), self.user_id.clone());
        raw.insert(EVENT_TYPE.to_string(), Value::String(self.event_type.clone()));
        raw.insert(TIMESTAMP.to_string(), Value::String(format_instant(self.timestamp)));
        raw.insert(
            INGESTION_TIMESTAMP.to_string(),
            Value::String(format_instant(self.ingestion_timestamp)),
        );
        for (key, value) in &self.attributes {
            raw.insert(key.clone(), value.clone());
        }
        raw
    }
}

fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_object() {
        let raw = decode(Some(br#"{"user_id":"u1","event_type":"checkout"}"#)).unwrap();
        assert_eq!(raw.get("user_id"), Some(&json!("u1")));
        assert_eq!(raw.len(), 2);
    }

    #[test]
    fn test_decode_rejects_non_objects() {
        assert!(matches!(decode(Some(b"[1,2]")), Err(DecodeError::NotAnObject)));
        assert!(matches!(decode(Some(b"\"text\"")), Err(DecodeError::NotAnObject)));
        assert!(matches!(decode(Some(b"{not json")), Err(DecodeError::Json { .. })));
        assert!(matches!(decode(None), Err(DecodeError::EmptyPayload)));
        assert!(matches!(decode(Some(b"")), Err(DecodeError::EmptyPayload)));
    }

    #[test]
    fn test_to_raw_field_order() {
        let at = DateTime::parse_from_rfc3339("2026-01-18T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut attributes = Map::new();
        attributes.insert("page_url".to_string(), json!("/products/1"));
        attributes.insert("product_id".to_string(), json!(1));

        let event = NormalizedEvent {
            user_id: json!("123"),
            event_type: "view_product".to_string(),
            timestamp: at,
            ingestion_timestamp: at,
            attributes,
        };
        let raw = event.to_raw();
        let keys: Vec<&str> = raw.keys().map(String::as_str).collect();

        assert_eq!(
            keys,
            ["user_id", "event_type", "timestamp", "ingestion_timestamp", "page_url", "product_id"]
        );
        assert_eq!(raw["timestamp"], json!("2026-01-18T10:00:00Z"));
    }
}
