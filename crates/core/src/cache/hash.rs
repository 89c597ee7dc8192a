//! Content-addressed cache key generation.

use sha2::{Digest, Sha256};

/// Compute the storage key for a request key (canonical URL).
///
/// Request keys that compare equal always hash to the same entry.
pub fn compute_cache_key(request_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request_key.as_bytes());
    hex::encode(hasher.finalize())
}
