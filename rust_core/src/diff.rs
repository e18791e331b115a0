//! Content fingerprinting for republish gating.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Deterministic fingerprint of a rendered payload: SHA-256 over its JSON
/// serialization. Struct field order fixes the byte stream, so equal
/// payloads always hash equally and any rendered field change moves the
/// hash. Payload types keep ordered data in vectors, never maps.
pub fn fingerprint<T: Serialize>(payload: &T) -> String {
    let bytes = serde_json::to_vec(payload).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}
