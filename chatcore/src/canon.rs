//! Stable JSON canonicalization and SHA256 hashing, shared by the tool
//! dedup ledger and the message/tool audit chain (`SPEC_FULL.md` §4.4, §4.6).

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Canonicalize a JSON value: object keys sorted lexicographically at every
/// level, arrays left in original order, and the given field names dropped
/// from every object level (used for the dedup ledger's `ignoreArgs`).
#[must_use]
pub fn canonicalize(value: &Value, ignore: &[String]) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = Map::new();
            let mut keys: Vec<&String> = map.keys().filter(|k| !ignore.contains(k)).collect();
            keys.sort();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.clone(), canonicalize(v, ignore));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| canonicalize(v, ignore)).collect())
        }
        other => other.clone(),
    }
}

/// Render a value to its canonical JSON string form (stable key ordering,
/// no insignificant whitespace). `ignore` is applied recursively.
#[must_use]
pub fn canonical_json(value: &Value, ignore: &[String]) -> String {
    serde_json::to_string(&canonicalize(value, ignore)).unwrap_or_default()
}

/// SHA256 of a UTF-8 string, returned as lowercase hex.
#[must_use]
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Hash a canonicalized value directly.
#[must_use]
pub fn canonical_hash(value: &Value, ignore: &[String]) -> String {
    sha256_hex(&canonical_json(value, ignore))
}

/// Compute the next audit-chain hash: `SHA256(prev || canonical)`.
#[must_use]
pub fn chain_hash(prev_hash: &str, canonical: &str) -> String {
    sha256_hex(&format!("{prev_hash}{canonical}"))
}
