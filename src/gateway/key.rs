//! Cache key generation using SHA-256 hashes

use reqwest::Method;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Generate a deterministic cache key from method, endpoint, body and the
/// caller's idempotency key.
///
/// The same key indexes both cached responses and in-flight requests. JSON
/// object keys serialize in sorted order, so bodies that differ only in key
/// order map to the same key. Calls carrying different idempotency keys are
/// distinct operations and never share a key.
pub fn cache_key(
    method: &Method,
    endpoint: &str,
    body: Option<&Value>,
    idempotency_key: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();

    hasher.update(method.as_str().as_bytes());
    hasher.update(b"|");

    hasher.update(endpoint.as_bytes());
    hasher.update(b"|");

    if let Some(body) = body {
        hasher.update(body.to_string().as_bytes());
    }

    if let Some(idempotency_key) = idempotency_key {
        hasher.update(b"|");
        hasher.update(idempotency_key.as_bytes());
    }

    format!("{:x}", hasher.finalize())
}
