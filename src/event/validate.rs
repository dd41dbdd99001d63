use chrono::format::{self, Parsed, StrftimeItems};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use std::sync::LazyLock;

use super::{EVENT_TYPE, INGESTION_TIMESTAMP, NormalizedEvent, RawEvent, TIMESTAMP, USER_ID};
use crate::error::ValidationError;

/// Extended and basic ISO-8601 date-times, most precise first.
const DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H",
    "%Y%m%dT%H%M%S%.f",
    "%Y%m%dT%H%M",
    "%Y%m%dT%H",
];

/// No offset, `+HH:MM`, then `+HHMM`.
const OFFSET_SUFFIXES: &[&str] = &["", "%:z", "%z"];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y%m%d"];

static TIMESTAMP_FORMATS: LazyLock<Vec<String>> = LazyLock::new(|| {
    DATE_TIME_FORMATS
        .iter()
        .flat_map(|base| OFFSET_SUFFIXES.iter().map(move |offset| format!("{base}{offset}")))
        .collect()
});

/// Turns raw events into normalized events or rejects them.
///
/// Required fields are `user_id`, `event_type` and `timestamp`. A rejected
/// event never yields a partial record.
#[derive(Debug, Clone, Copy, Default)]
pub struct Validator;

impl Validator {
    pub fn new() -> Self {
        Self
    }

    /// Validate using the current time as the ingestion instant.
    pub fn validate(&self, raw: RawEvent) -> Result<NormalizedEvent, ValidationError> {
        self.validate_at(raw, Utc::now())
    }

    /// Validate with an explicit ingestion instant. Pure.
    pub fn validate_at(
        &self,
        mut raw: RawEvent,
        now: DateTime<Utc>,
    ) -> Result<NormalizedEvent, ValidationError> {
        let user_id = match take_present(&mut raw, USER_ID)? {
            Value::Object(_) | Value::Array(_) => return Err(ValidationError::UserIdNotScalar),
            scalar => scalar,
        };
        let event_type = match take_present(&mut raw, EVENT_TYPE)? {
            Value::String(s) => s.to_lowercase(),
            _ => return Err(ValidationError::EventTypeNotString),
        };
        let timestamp = match take_present(&mut raw, TIMESTAMP)? {
            Value::String(s) => parse_timestamp(&s)
                .ok_or(ValidationError::InvalidTimestamp { value: s })?,
            other => {
                return Err(ValidationError::InvalidTimestamp {
                    value: other.to_string(),
                });
            }
        };

        // Stamped here; an upstream value is replaced.
        raw.shift_remove(INGESTION_TIMESTAMP);

        Ok(NormalizedEvent {
            user_id,
            event_type,
            timestamp,
            ingestion_timestamp: now,
            attributes: raw,
        })
    }
}

/// Remove `field`. JSON null counts as absent.
fn take_present(raw: &mut RawEvent, field: &'static str) -> Result<Value, ValidationError> {
    match raw.shift_remove(field) {
        None | Some(Value::Null) => Err(ValidationError::MissingField { field }),
        Some(value) => Ok(value),
    }
}

/// Parse an ISO-8601 instant. Values without an offset are taken as UTC.
///
/// Accepts the extended and basic forms at hour, minute, second or
/// fractional precision, a `T` or space separator, an optional `Z`, `+HH:MM`
/// or `+HHMM` offset, and a bare date.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    let mut value = value.replacen(' ', "T", 1);
    if value.ends_with(['Z', 'z']) {
        value.pop();
        value.push_str("+00:00");
    }

    if let Some(instant) = TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| parse_with(&value, format))
    {
        return Some(instant);
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(&value, format).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn parse_with(value: &str, format: &str) -> Option<DateTime<Utc>> {
    let mut parsed = Parsed::new();
    format::parse(&mut parsed, value, StrftimeItems::new(format)).ok()?;
    if !format.contains("%M") {
        parsed.set_minute(0).ok()?;
    }
    if let Ok(dt) = parsed.to_datetime() {
        return Some(dt.with_timezone(&Utc));
    }
    parsed
        .to_naive_datetime_with_offset(0)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn raw(value: Value) -> RawEvent {
        match value {
            Value::Object(map) => map,
            _ => panic!("test event must be an object"),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 18, 10, 5, 0).unwrap()
    }

    #[test]
    fn test_example_event_normalized() {
        let event = Validator::new()
            .validate_at(
                raw(json!({
                    "user_id": "123",
                    "event_type": "VIEW_PRODUCT",
                    "timestamp": "2026-01-18T10:00:00"
                })),
                now(),
            )
            .unwrap();

        assert_eq!(event.user_id, json!("123"));
        assert_eq!(event.event_type, "view_product");
        assert_eq!(event.timestamp, Utc.with_ymd_and_hms(2026, 1, 18, 10, 0, 0).unwrap());
        assert_eq!(event.ingestion_timestamp, now());
        assert!(event.attributes.is_empty());
    }

    #[test]
    fn test_extra_fields_kept_in_order() {
        let event = Validator::new()
            .validate_at(
                raw(json!({
                    "session_id": "s-1",
                    "user_id": 42,
                    "event_type": "checkout",
                    "timestamp": "2026-01-18T10:00:00+02:00",
                    "product_id": 7
                })),
                now(),
            )
            .unwrap();

        let keys: Vec<&str> = event.attributes.keys().map(String::as_str).collect();
        assert_eq!(keys, ["session_id", "product_id"]);
        assert_eq!(event.user_id, json!(42));
        assert_eq!(event.timestamp, Utc.with_ymd_and_hms(2026, 1, 18, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_missing_required_fields_rejected() {
        let complete = json!({
            "user_id": "u",
            "event_type": "view_product",
            "timestamp": "2026-01-18T10:00:00"
        });
        for field in [USER_ID, EVENT_TYPE, TIMESTAMP] {
            let mut event = raw(complete.clone());
            event.remove(field);
            assert_eq!(
                Validator::new().validate_at(event, now()),
                Err(ValidationError::MissingField { field })
            );

            let mut nulled = raw(complete.clone());
            nulled.insert(field.to_string(), Value::Null);
            assert_eq!(
                Validator::new().validate_at(nulled, now()),
                Err(ValidationError::MissingField { field })
            );
        }
    }

    #[test]
    fn test_user_id_must_be_scalar() {
        for user_id in [json!("u"), json!(42), json!(true)] {
            let event = Validator::new()
                .validate_at(
                    raw(json!({"user_id": user_id, "event_type": "checkout", "timestamp": "2026-01-18"})),
                    now(),
                )
                .unwrap();
            assert_eq!(event.user_id, user_id);
        }
        for user_id in [json!({"id": 1}), json!([1, 2])] {
            let result = Validator::new().validate_at(
                raw(json!({"user_id": user_id, "event_type": "checkout", "timestamp": "2026-01-18"})),
                now(),
            );
            assert_eq!(result, Err(ValidationError::UserIdNotScalar));
        }
    }

    #[test]
    fn test_unparseable_timestamp_rejected() {
        for bad in [json!("yesterday"), json!("2026-13-01T00:00:00"), json!(1768730400)] {
            let result = Validator::new().validate_at(
                raw(json!({"user_id": "u", "event_type": "checkout", "timestamp": bad})),
                now(),
            );
            assert!(matches!(result, Err(ValidationError::InvalidTimestamp { .. })));
        }
    }

    #[test]
    fn test_non_string_event_type_rejected() {
        let result = Validator::new().validate_at(
            raw(json!({"user_id": "u", "event_type": 3, "timestamp": "2026-01-18"})),
            now(),
        );
        assert_eq!(result, Err(ValidationError::EventTypeNotString));
    }

    #[test]
    fn test_validation_is_idempotent() {
        let validator = Validator::new();
        let first = validator
            .validate_at(
                raw(json!({
                    "user_id": "123",
                    "event_type": "Add_To_Cart",
                    "timestamp": "2026-01-18 10:00:00.250",
                    "page_url": "/cart"
                })),
                now(),
            )
            .unwrap();
        let second = validator.validate_at(first.to_raw(), now()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_upstream_ingestion_timestamp_replaced() {
        let event = Validator::new()
            .validate_at(
                raw(json!({
                    "user_id": "u",
                    "event_type": "checkout",
                    "timestamp": "2026-01-18",
                    "ingestion_timestamp": "1999-01-01T00:00:00Z"
                })),
                now(),
            )
            .unwrap();
        assert_eq!(event.ingestion_timestamp, now());
        assert!(!event.attributes.contains_key(INGESTION_TIMESTAMP));
    }

    #[test]
    fn test_parse_timestamp_forms() {
        let expected = Utc.with_ymd_and_hms(2026, 1, 18, 10, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2026-01-18T10:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2026-01-18T10:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-01-18 10:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-01-18T10:00"), Some(expected));
        assert_eq!(
            parse_timestamp("2026-01-18"),
            Some(Utc.with_ymd_and_hms(2026, 1, 18, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn test_parse_timestamp_iso_variants() {
        let ten = Utc.with_ymd_and_hms(2026, 1, 18, 10, 0, 0).unwrap();
        let eight = Utc.with_ymd_and_hms(2026, 1, 18, 8, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2026-01-18T10:00Z"), Some(ten));
        assert_eq!(parse_timestamp("2026-01-18T10:00+02:00"), Some(eight));
        assert_eq!(parse_timestamp("2026-01-18T10:00:00+0200"), Some(eight));
        assert_eq!(parse_timestamp("2026-01-18 10:00:00.000+0200"), Some(eight));
        assert_eq!(parse_timestamp("2026-01-18T10"), Some(ten));
        assert_eq!(parse_timestamp("2026-01-18T12+02:00"), Some(ten));
        assert_eq!(parse_timestamp("20260118T100000"), Some(ten));
        assert_eq!(parse_timestamp("20260118T1200+0200"), Some(ten));
        assert_eq!(parse_timestamp("20260118T100000Z"), Some(ten));
        assert_eq!(
            parse_timestamp("20260118"),
            Some(Utc.with_ymd_and_hms(2026, 1, 18, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_parse_timestamp_rejects_malformed_iso() {
        for bad in ["2026-01-18T", "2026-01-18T25", "2026-01-18T10:00+2", "10:00"] {
            assert_eq!(parse_timestamp(bad), None, "{bad}");
        }
    }
}
