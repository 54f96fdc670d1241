//! Cache key definitions.
//!
//! Keys are `darkroom:{namespace}:{id}` where `id` is usually a
//! [`Fingerprint`] of the request value.

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::error::CacheError;

pub const KEY_PREFIX: &str = "darkroom";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheNamespace {
    /// Listing pages keyed by filter fingerprint.
    Posts,
    /// The distinct author list.
    Authors,
    /// Similarity results keyed by similarity-filter fingerprint.
    Similar,
    /// Reverse index: post id to the similarity fingerprints it appears under.
    SimilarIds,
}

impl CacheNamespace {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheNamespace::Posts => "posts",
            CacheNamespace::Authors => "authors",
            CacheNamespace::Similar => "similar",
            CacheNamespace::SimilarIds => "similar-ids",
        }
    }

    pub fn key(self, id: &str) -> String {
        format!("{KEY_PREFIX}:{}:{id}", self.as_str())
    }
}

/// Structural hash of a value, stable across processes and releases.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hashes the canonical JSON form of `value`. Object keys are emitted in a
    /// fixed order, so equal values always hash equally.
    pub fn of<T: Serialize + ?Sized>(value: &T) -> Result<Self, CacheError> {
        let canonical = serde_json::to_value(value).map_err(CacheError::Fingerprint)?;
        let bytes = serde_json::to_vec(&canonical).map_err(CacheError::Fingerprint)?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(Self(hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn key(&self, namespace: CacheNamespace) -> String {
        namespace.key(&self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
