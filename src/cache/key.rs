//! Cache key generation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Request headers that take part in the cache key.
///
/// A `BTreeMap` so that serialization order, and therefore the key, does not
/// depend on insertion order.
pub type RequestHeaders = BTreeMap<String, String>;

/// Stable digest of `(identifier, headers)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey {
    hash: String,
}

#[derive(Serialize)]
struct Canonical<'a> {
    url: &'a str,
    headers: &'a RequestHeaders,
}

impl CacheKey {
    /// Derive the key for a request.
    pub fn for_request(identifier: &str, headers: &RequestHeaders) -> Self {
        let canonical = Canonical {
            url: identifier,
            headers,
        };
        // Serializing a struct of a str and a string map cannot fail.
        let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
        let hash = hex::encode(Sha256::digest(&bytes));
        Self { hash }
    }

    /// Rebuild a key from its hex form (e.g. a disk file stem).
    pub fn from_hex(hash: impl Into<String>) -> Option<Self> {
        let hash = hash.into();
        let valid = hash.len() == 64 && hash.bytes().all(|b| b.is_ascii_hexdigit());
        valid.then_some(Self { hash })
    }

    pub fn as_str(&self) -> &str {
        &self.hash
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}
