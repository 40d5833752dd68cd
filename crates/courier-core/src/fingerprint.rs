//! # Print Request Fingerprints
//!
//! Two print requests with the same kind and parameters map to the same
//! fingerprint, which keys the local print job cache.
//!
//! Parameters are canonicalized (object keys sorted at every level) before
//! hashing, so field insertion order never changes the fingerprint.

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::types::PrintKind;

/// Lowercase hex SHA-256 of `kind` and the canonical JSON of `params`.
pub fn print_fingerprint(kind: PrintKind, params: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(canonical(params).to_string().as_bytes());
    hex::encode(hasher.finalize())
}

fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonical(v))).collect();
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a = json!({ "orders": [{ "cdek_number": "1" }], "copy_count": 2, "type": "tpl_russia" });
        let mut b = serde_json::Map::new();
        b.insert("type".to_string(), json!("tpl_russia"));
        b.insert("copy_count".to_string(), json!(2));
        b.insert("orders".to_string(), json!([{ "cdek_number": "1" }]));

        assert_eq!(
            print_fingerprint(PrintKind::Receipt, &a),
            print_fingerprint(PrintKind::Receipt, &Value::Object(b))
        );
    }

    #[test]
    fn test_fingerprint_depends_on_kind_and_params() {
        let params = json!({ "orders": [{ "cdek_number": "1" }] });
        let receipt = print_fingerprint(PrintKind::Receipt, &params);

        assert_ne!(receipt, print_fingerprint(PrintKind::Barcode, &params));
        assert_ne!(
            receipt,
            print_fingerprint(PrintKind::Receipt, &json!({ "orders": [{ "cdek_number": "2" }] }))
        );
        assert_eq!(receipt.len(), 64);
    }
}
