//! Shared SHA-256 hex digest utility.
//!
//! Used to derive task idempotency keys from a dispatch target and body.

use sha2::{Digest, Sha256};

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Derive a stable idempotency key for dispatching `body` to `target`.
///
/// Two dispatches with the same target and byte-identical JSON body share a
/// key, so a redelivered or duplicated dispatch collapses onto one task.
pub fn idempotency_key(target: &str, body: &serde_json::Value) -> String {
    let mut data = Vec::with_capacity(target.len() + 64);
    data.extend_from_slice(target.as_bytes());
    data.push(b'\n');
    data.extend_from_slice(body.to_string().as_bytes());
    sha256_hex(&data)
}
