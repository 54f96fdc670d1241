use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend `{backend}` failed: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },
    #[error("failed to encode cache value: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode cache value: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to fingerprint value: {0}")]
    Fingerprint(#[source] serde_json::Error),
}

impl CacheError {
    pub fn backend(backend: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Backend {
            backend,
            message: err.to_string(),
        }
    }
}
