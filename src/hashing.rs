//! Hashing - SHA-256 over canonical JSON
//!
//! Definition hashes let a report be matched to the exact input that produced
//! it; seed hashing makes `seeded` values reproducible across platforms.

use serde::Serialize;
use serde_json::{to_string, Value as Json};
use sha2::{Digest, Sha256};

use crate::value::Value;

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Convert to canonical JSON (sorted keys, no whitespace)
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v: Json = serde_json::to_value(value)?;
    to_string(&sort_value(&v))
}

fn sort_value(v: &Json) -> Json {
    match v {
        Json::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            Json::Object(
                sorted
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sort_value(v)))
                    .collect(),
            )
        }
        Json::Array(arr) => Json::Array(arr.iter().map(sort_value).collect()),
        _ => v.clone(),
    }
}

/// Hash of one definition, or of a whole definitions file.
pub fn compute_definition_hash<T: Serialize>(definition: &T) -> Result<String, serde_json::Error> {
    let canonical = canonical_json(definition)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// RNG seed for a value: the first 8 bytes of the SHA-256 of its canonical JSON.
/// Equal seeds give equal results regardless of key order.
pub fn seed_from_value(seed: &Value) -> u64 {
    let canonical = to_string(&sort_value(&seed.to_json())).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}
