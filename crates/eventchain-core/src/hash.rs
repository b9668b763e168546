//! Deterministic event digests.
//!
//! An event's hash is the lowercase hex SHA-256 of a canonical JSON object
//! holding exactly five fields:
//!
//! ```text
//! {"data":<payload>,"eventType":"..","previousHash":"..","sourceAppId":"..","timestamp":".."}
//! ```
//!
//! Object keys are emitted in byte order at every nesting level, with no
//! insignificant whitespace. The timestamp is RFC 3339 in UTC with exactly
//! three fractional digits and a `Z` suffix.
//!
//! Numbers are brought into one fixed form first (see [`normalize_payload`]):
//! a float with no fractional part is written as an integer and `-0` becomes
//! `0`. A payload therefore digests the same whether it was built in memory
//! or read back from a store that rewrites numeric text.
//!
//! The `id` and `hash` fields never participate.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use eventchain_types::Event;
use serde::Serialize;
use serde_json::{Number, Value};
use sha2::{Digest, Sha256};

/// The hashed record. Field order is the byte order of the renamed keys.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HashRecord<'a> {
    data: &'a Value,
    event_type: &'a str,
    previous_hash: &'a str,
    source_app_id: &'a str,
    timestamp: String,
}

/// Truncate a timestamp to the millisecond resolution used for hashing and
/// storage.
pub fn normalize_timestamp(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp.trunc_subsecs(3)
}

/// Render a timestamp the way it is hashed.
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    normalize_timestamp(timestamp).to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Rewrite every number in `value` into its canonical form.
///
/// Floats with no fractional part that fit in `i64` or `u64` become
/// integers, which also folds `-0.0` into `0`. Other numbers are left as
/// they are.
pub fn normalize_payload(value: Value) -> Value {
    match value {
        Value::Number(n) => Value::Number(normalize_number(n)),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_payload).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, item)| (key, normalize_payload(item)))
                .collect(),
        ),
        other => other,
    }
}

fn normalize_number(n: Number) -> Number {
    let Some(f) = n.as_f64().filter(|_| n.is_f64()) else {
        return n;
    };
    if !f.is_finite() || f.fract() != 0.0 {
        return n;
    }
    let whole = format!("{f:.0}");
    whole
        .parse::<i64>()
        .map(Number::from)
        .or_else(|_| whole.parse::<u64>().map(Number::from))
        .unwrap_or(n)
}

/// Compute the digest for the given linkable fields.
pub fn event_hash(
    event_type: &str,
    timestamp: DateTime<Utc>,
    source_app_id: &str,
    data: &Value,
    previous_hash: &str,
) -> String {
    let data = normalize_payload(data.clone());
    let record = HashRecord {
        data: &data,
        event_type,
        previous_hash,
        source_app_id,
        timestamp: format_timestamp(timestamp),
    };
    // A record of strings and a `Value` always serializes.
    let bytes = serde_json::to_vec(&record).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

/// Recompute the digest of a stored event from its content.
pub fn recompute(event: &Event) -> String {
    event_hash(
        &event.event_type,
        event.timestamp,
        &event.source_app_id,
        &event.data,
        &event.previous_hash,
    )
}

/// Canonical JSON text of `value`: normalized numbers, sorted keys, no
/// whitespace.
pub fn canonical_json(value: &Value) -> String {
    serde_json::to_string(&normalize_payload(value.clone())).unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).single().unwrap()
    }

    #[test]
    fn digest_is_64_lowercase_hex() {
        let hash = event_hash("user.login", ts(), "auth-service", &json!({"userId": "u1"}), "0");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":{"y":[1,2],"x":"s"}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":{"x":"s","y":[1,2]},"b":1}"#).unwrap();
        assert_eq!(canonical_json(&a), r#"{"a":{"x":"s","y":[1,2]},"b":1}"#);
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(
            event_hash("t", ts(), "s", &a, "0"),
            event_hash("t", ts(), "s", &b, "0")
        );
    }

    #[test]
    fn canonical_form_is_compact_and_sorted() {
        let value = json!({"z": null, "a": [true, 1.5, "q\"\n"], "m": {"k": -3}});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":[true,1.5,"q\"\n"],"m":{"k":-3},"z":null}"#
        );
    }

    #[test]
    fn control_characters_are_escaped() {
        assert_eq!(canonical_json(&json!("\u{01}")), r#""\u0001""#);
    }

    #[test]
    fn whole_floats_hash_like_integers() {
        let int: Value = serde_json::from_str(r#"{"x":1}"#).unwrap();
        let float: Value = serde_json::from_str(r#"{"x":1.0}"#).unwrap();
        assert_eq!(canonical_json(&float), r#"{"x":1}"#);
        assert_eq!(
            event_hash("t", ts(), "s", &int, "0"),
            event_hash("t", ts(), "s", &float, "0")
        );
    }

    #[test]
    fn negative_zero_becomes_zero() {
        let value: Value = serde_json::from_str(r#"{"a":-0.0,"b":[-0.0]}"#).unwrap();
        assert_eq!(canonical_json(&value), r#"{"a":0,"b":[0]}"#);
        assert_eq!(
            event_hash("t", ts(), "s", &value, "0"),
            event_hash("t", ts(), "s", &json!({"a": 0, "b": [0]}), "0")
        );
    }

    #[test]
    fn exponent_forms_match_their_expanded_text() {
        // Stores such as JSONB return these numbers in expanded form.
        let cases = [
            (r#"{"x":1e16}"#, r#"{"x":10000000000000000}"#),
            (r#"{"x":2.5e17}"#, r#"{"x":250000000000000000}"#),
            (r#"{"x":1e19}"#, r#"{"x":10000000000000000000}"#),
            (r#"{"x":1e20}"#, r#"{"x":100000000000000000000}"#),
        ];
        for (written, read_back) in cases {
            let written: Value = serde_json::from_str(written).unwrap();
            let read_back: Value = serde_json::from_str(read_back).unwrap();
            assert_eq!(canonical_json(&written), canonical_json(&read_back));
            assert_eq!(
                event_hash("t", ts(), "s", &written, "0"),
                event_hash("t", ts(), "s", &read_back, "0")
            );
        }
    }

    #[test]
    fn fractional_and_integer_numbers_are_untouched() {
        let value = json!({"f": 2.25, "i": -7, "u": u64::MAX});
        assert_eq!(normalize_payload(value.clone()), value);
    }

    #[test]
    fn every_field_participates() {
        let data = json!({"n": 1});
        let base = event_hash("t", ts(), "s", &data, "0");
        assert_ne!(base, event_hash("u", ts(), "s", &data, "0"));
        assert_ne!(base, event_hash("t", ts(), "x", &data, "0"));
        assert_ne!(base, event_hash("t", ts(), "s", &json!({"n": 2}), "0"));
        assert_ne!(base, event_hash("t", ts(), "s", &data, "1"));
        let later = ts() + chrono::Duration::milliseconds(1);
        assert_ne!(base, event_hash("t", later, "s", &data, "0"));
    }

    #[test]
    fn sub_millisecond_precision_is_ignored() {
        let data = json!({});
        let fine = ts() + chrono::Duration::microseconds(250);
        assert_eq!(
            event_hash("t", ts(), "s", &data, "0"),
            event_hash("t", fine, "s", &data, "0")
        );
    }

    #[test]
    fn timestamp_has_three_fraction_digits() {
        assert_eq!(format_timestamp(ts()), "2024-01-01T12:00:00.000Z");
    }
}
