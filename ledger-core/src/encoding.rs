//! Canonical byte encoding used for every consensus hash and signature.
//!
//! The reference form is UTF-8 JSON with object keys sorted lexicographically
//! and no surrounding whitespace, produced by recursively re-keying a
//! `serde_json::Value` rather than relying on a serializer's incidental key
//! order. This is the form pinned down in the Open Question about canonical
//! encoding: one agreed byte form, not a choice left to each implementation.

use serde::Serialize;
use serde_json::{Map, Value};

/// Serializes `value` to canonical bytes: sorted keys, compact separators.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    let raw = serde_json::to_value(value).expect("value must be JSON-representable");
    let sorted = sort_keys(raw);
    serde_json::to_vec(&sorted).expect("sorted value must serialize")
}

/// Field names whose integer values are rendered as fixed-8-decimal strings
/// rather than JSON numbers, at every nesting depth (top-level `amount`/
/// `fee` and the same fields inside each `outputs[]` entry).
const DECIMAL_AMOUNT_FIELDS: [&str; 2] = ["amount", "fee"];

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = Map::new();
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            for key in keys {
                let v = map.get(&key).cloned().unwrap_or(Value::Null);
                let v = if DECIMAL_AMOUNT_FIELDS.contains(&key.as_str()) {
                    render_amount_field(v)
                } else {
                    sort_keys(v)
                };
                sorted.insert(key, v);
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Renders an `amount`/`fee` field as its fixed-8-decimal string form. Falls
/// back to `sort_keys` for anything that isn't a plain integer (e.g. `null`
/// for an absent optional amount), rather than silently dropping it.
fn render_amount_field(value: Value) -> Value {
    match value.as_u64() {
        Some(amount) => Value::String(amount_to_decimal_string(amount)),
        None => sort_keys(value),
    }
}

/// Renders a fixed-point amount (8 implied decimals) as a decimal string,
/// the wire form required to avoid floating-point loss.
#[must_use]
pub fn amount_to_decimal_string(amount: u64) -> String {
    let whole = amount / crate::params::UNIT;
    let frac = amount % crate::params::UNIT;
    format!("{whole}.{frac:08}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_nested_object_keys() {
        let value = json!({"b": 1, "a": {"d": 2, "c": 3}});
        let bytes = canonical_bytes(&value);
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, r#"{"a":{"c":3,"d":2},"b":1}"#);
    }

    #[test]
    fn amount_formats_with_eight_decimals() {
        assert_eq!(amount_to_decimal_string(1_000_000_00), "1.00000000");
        assert_eq!(amount_to_decimal_string(10), "0.00000010");
    }

    #[test]
    fn canonical_bytes_renders_amount_and_fee_as_decimal_strings_at_any_depth() {
        let value = json!({
            "amount": 1_000_000_00u64,
            "fee": 10u64,
            "outputs": [{"address": "a", "amount": 5u64}],
        });
        let bytes = canonical_bytes(&value);
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text,
            r#"{"amount":"1.00000000","fee":"0.00000010","outputs":[{"address":"a","amount":"0.00000005"}]}"#
        );
    }
}
