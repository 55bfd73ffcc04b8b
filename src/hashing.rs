//! Hashing - Fingerprints & Checksums
//!
//! Identical compilations must produce identical fingerprints, so everything
//! hashed here goes through canonical JSON first.

use serde::Serialize;
use serde_json::{to_string, Value};
use sha2::{Digest, Sha256};

use crate::print::PrintElement;

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Convert to canonical JSON (sorted keys, no whitespace)
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v: Value = serde_json::to_value(value)?;
    to_string(&sort_value(&v))
}

fn sort_value(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                sorted
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sort_value(v)))
                    .collect(),
            )
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_value).collect()),
        _ => v.clone(),
    }
}

/// Fingerprint of a compiled element list.
/// fingerprint = sha256(template_id + ":" + canonical(elements))
pub fn element_fingerprint(
    template_id: &str,
    elements: &[PrintElement],
) -> Result<String, serde_json::Error> {
    let canonical = canonical_json(&elements)?;
    Ok(sha256_hex(format!("{}:{}", template_id, canonical).as_bytes()))
}
