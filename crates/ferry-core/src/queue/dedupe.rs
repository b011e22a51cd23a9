//! Deduplication keys.
//!
//! A key is always scoped to its operation type: the same key under two
//! different types never collides. Two schemes are supported:
//! - `Dedupe::Key`: caller-supplied, stored as `key:<value>`
//! - `Dedupe::Payload`: structural signature of the payload, stored as
//!   `sha256:<hex>` over its canonical JSON (object keys sorted, no whitespace)

use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dedupe {
    Key(String),
    Payload,
}

impl Dedupe {
    /// Caller-supplied key.
    pub fn key(key: impl Into<String>) -> Self {
        Dedupe::Key(key.into())
    }

    /// Resolve to the string stored on the operation.
    pub fn resolve(&self, payload: &serde_json::Value) -> String {
        match self {
            Dedupe::Key(key) => format!("key:{key}"),
            Dedupe::Payload => format!("sha256:{}", payload_signature(payload)),
        }
    }
}

/// Hex SHA-256 of the payload's canonical JSON.
pub fn payload_signature(payload: &serde_json::Value) -> String {
    let mut canonical = String::new();
    write_canonical(payload, &mut canonical);
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn signature_ignores_key_order() {
        let a = json!({"title": "Buy milk", "meta": {"x": 1, "y": [1, 2]}});
        let b: serde_json::Value =
            serde_json::from_str(r#"{"meta":{"y":[1,2],"x":1},"title":"Buy milk"}"#).unwrap();
        assert_eq!(payload_signature(&a), payload_signature(&b));
    }

    #[test]
    fn signature_depends_on_values() {
        let a = json!({"title": "Buy milk"});
        let b = json!({"title": "Buy bread"});
        assert_ne!(payload_signature(&a), payload_signature(&b));

        // array order is significant
        assert_ne!(
            payload_signature(&json!([1, 2])),
            payload_signature(&json!([2, 1]))
        );
    }

    #[test]
    fn signature_is_hex_sha256() {
        let sig = payload_signature(&json!(null));
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn schemes_do_not_collide() {
        let payload = json!({"title": "x"});
        let derived = Dedupe::Payload.resolve(&payload);
        let explicit = Dedupe::key(payload_signature(&payload)).resolve(&payload);
        assert!(derived.starts_with("sha256:"));
        assert!(explicit.starts_with("key:"));
        assert_ne!(derived, explicit);
    }
}
