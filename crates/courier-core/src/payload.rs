//! # Payload Shaping
//!
//! Helpers for the loosely typed JSON the courier platform speaks.
//!
//! - [`sanitize_payload`] strips empty values before a payload is sent
//! - [`ensure_package_comments`] fills in the placeholder comment packages need
//! - [`normalize_flag`] turns bool-like values into `Option<bool>`
//! - [`text`], [`number_i64`], [`number_f64`] read fields that may arrive as
//!   numbers or strings

use serde_json::{Map, Value};

use crate::EMPTY_PACKAGE_COMMENT;

// =============================================================================
// Sanitizing
// =============================================================================

/// Recursively removes null values, blank strings, and empty objects.
///
/// Objects emptied by the removal are removed themselves. Array elements
/// that sanitize to nothing are dropped; the remaining elements keep their
/// order. Empty arrays are kept, as the platform distinguishes `[]` from an
/// absent field for some collections.
///
/// ```rust
/// use courier_core::payload::sanitize_payload;
/// use serde_json::json;
///
/// let clean = sanitize_payload(json!({
///     "comment": "",
///     "recipient": { "name": "Ivan", "email": null },
///     "services": {},
/// }));
/// assert_eq!(clean, Some(json!({ "recipient": { "name": "Ivan" } })));
/// ```
pub fn sanitize_payload(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .filter_map(|(key, value)| sanitize_payload(value).map(|v| (key, v)))
                .collect();
            if cleaned.is_empty() {
                None
            } else {
                Some(Value::Object(cleaned))
            }
        }
        Value::Array(items) => Some(Value::Array(
            items.into_iter().filter_map(sanitize_payload).collect(),
        )),
        other => Some(other),
    }
}

/// Sets `comment` to the placeholder on every package that lacks one.
pub fn ensure_package_comments(payload: &mut Value) {
    let Some(packages) = payload.get_mut("packages").and_then(Value::as_array_mut) else {
        return;
    };

    for package in packages.iter_mut().filter_map(Value::as_object_mut) {
        let blank = match package.get("comment") {
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(Value::Null) | None => true,
            Some(_) => false,
        };
        if blank {
            package.insert(
                "comment".to_string(),
                Value::String(EMPTY_PACKAGE_COMMENT.to_string()),
            );
        }
    }
}

// =============================================================================
// Loose Value Coercion
// =============================================================================

/// Normalizes a bool-like value.
///
/// | input                        | result        |
/// |------------------------------|---------------|
/// | `true`, `"true"`, `1`, `"1"`  | `Some(true)`  |
/// | `false`, `"false"`, `0`, `"0"`| `Some(false)` |
/// | `null` / missing             | `None`        |
/// | other strings                | non-empty → `Some(true)` |
/// | other numbers                | non-zero → `Some(true)`  |
pub fn normalize_flag(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Null => None,
        Value::Bool(b) => Some(*b),
        Value::Number(n) => Some(n.as_f64().map(|f| f != 0.0).unwrap_or(true)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" | "" => Some(false),
            _ => Some(true),
        },
        Value::Array(items) => Some(!items.is_empty()),
        Value::Object(map) => Some(!map.is_empty()),
    }
}

/// Reads a string field, accepting numbers as well. Blank strings are `None`.
pub fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Reads an integer field, accepting numeric strings.
pub fn number_i64(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Reads a float field, accepting numeric strings.
pub fn number_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Clones a JSON value unless it is null or absent.
pub fn json_or_none(value: Option<&Value>) -> Option<Value> {
    match value {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitize_nested() {
        let payload = json!({
            "number": "ORD-1",
            "tariff_code": 136,
            "sender": { "company": "  ", "phones": [{ "number": "+79990000000", "additional": null }] },
            "to_location": { "code": 44, "address": null },
            "services": [{}, { "code": "INSURANCE", "parameter": "" }],
            "empty": {},
            "nested": { "deeper": { "gone": null } },
            "flag": false,
            "zero": 0
        });

        let clean = sanitize_payload(payload).unwrap();
        assert_eq!(
            clean,
            json!({
                "number": "ORD-1",
                "tariff_code": 136,
                "sender": { "phones": [{ "number": "+79990000000" }] },
                "to_location": { "code": 44 },
                "services": [{ "code": "INSURANCE" }],
                "flag": false,
                "zero": 0
            })
        );
    }

    #[test]
    fn test_sanitize_everything_empty() {
        assert_eq!(sanitize_payload(json!({ "a": null, "b": {} })), None);
        assert_eq!(sanitize_payload(Value::Null), None);
    }

    #[test]
    fn test_package_comments_forced() {
        let mut payload = json!({
            "packages": [
                { "number": "1", "weight": 500 },
                { "number": "2", "weight": 500, "comment": "   " },
                { "number": "3", "weight": 500, "comment": "fragile" }
            ]
        });
        ensure_package_comments(&mut payload);

        let comments: Vec<&str> = payload["packages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["comment"].as_str().unwrap())
            .collect();
        assert_eq!(comments, vec!["-", "-", "fragile"]);
    }

    #[test]
    fn test_normalize_flag() {
        assert_eq!(normalize_flag(Some(&json!(true))), Some(true));
        assert_eq!(normalize_flag(Some(&json!("true"))), Some(true));
        assert_eq!(normalize_flag(Some(&json!(1))), Some(true));
        assert_eq!(normalize_flag(Some(&json!("1"))), Some(true));
        assert_eq!(normalize_flag(Some(&json!(false))), Some(false));
        assert_eq!(normalize_flag(Some(&json!("false"))), Some(false));
        assert_eq!(normalize_flag(Some(&json!(0))), Some(false));
        assert_eq!(normalize_flag(Some(&json!("0"))), Some(false));
        assert_eq!(normalize_flag(Some(&Value::Null)), None);
        assert_eq!(normalize_flag(None), None);
    }

    #[test]
    fn test_loose_numbers() {
        assert_eq!(number_i64(Some(&json!("44"))), Some(44));
        assert_eq!(number_i64(Some(&json!(44))), Some(44));
        assert_eq!(number_f64(Some(&json!("55.75"))), Some(55.75));
        assert_eq!(number_f64(Some(&json!("n/a"))), None);
        assert_eq!(text(Some(&json!(1106394409))), Some("1106394409".to_string()));
        assert_eq!(text(Some(&json!(""))), None);
    }
}
