//! Cache configuration.
//!
//! Controls entry lifetimes, the write-back pool and backend selection via the
//! `[cache]` section of `darkroom.toml`.

use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

pub(crate) const DEFAULT_POSTS_TTL_SECS: u64 = 4 * 60 * 60;
pub(crate) const DEFAULT_AUTHORS_TTL_SECS: u64 = 4 * 60 * 60;
pub(crate) const DEFAULT_SIMILAR_TTL_SECS: u64 = 24 * 60 * 60;
pub(crate) const DEFAULT_SIMILAR_IDS_TTL_SECS: u64 = 24 * 60 * 60;
pub(crate) const DEFAULT_WRITE_TIMEOUT_MS: u64 = 5_000;
pub(crate) const DEFAULT_WRITEBACK_WORKERS: usize = 4;
pub(crate) const DEFAULT_WRITEBACK_QUEUE: usize = 256;
pub(crate) const DEFAULT_MEMORY_CAPACITY: usize = 1024;

/// Which store backs the caches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    Memory,
    Redis,
}

impl CacheBackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheBackendKind::Memory => "memory",
            CacheBackendKind::Redis => "redis",
        }
    }
}

impl FromStr for CacheBackendKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(CacheBackendKind::Memory),
            "redis" => Ok(CacheBackendKind::Redis),
            other => Err(format!("unknown cache backend `{other}`")),
        }
    }
}

/// Cache configuration from `darkroom.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    /// Connection URL, required when `backend = "redis"`.
    pub redis_url: Option<String>,
    /// Maximum entries held by the in-process backend.
    pub memory_capacity: usize,
    pub posts_ttl_secs: u64,
    pub authors_ttl_secs: u64,
    pub similar_ttl_secs: u64,
    /// Lifetime of the post id to similarity fingerprint reverse index.
    pub similar_ids_ttl_secs: u64,
    /// Deadline for a single background cache write.
    pub write_timeout_ms: u64,
    pub writeback_workers: usize,
    /// Pending background writes beyond this are dropped.
    pub writeback_queue: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            redis_url: None,
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            posts_ttl_secs: DEFAULT_POSTS_TTL_SECS,
            authors_ttl_secs: DEFAULT_AUTHORS_TTL_SECS,
            similar_ttl_secs: DEFAULT_SIMILAR_TTL_SECS,
            similar_ids_ttl_secs: DEFAULT_SIMILAR_IDS_TTL_SECS,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
            writeback_workers: DEFAULT_WRITEBACK_WORKERS,
            writeback_queue: DEFAULT_WRITEBACK_QUEUE,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            backend: settings.backend,
            redis_url: settings.redis_url.clone(),
            memory_capacity: settings.memory_capacity.get(),
            posts_ttl_secs: settings.posts_ttl.as_secs(),
            authors_ttl_secs: settings.authors_ttl.as_secs(),
            similar_ttl_secs: settings.similar_ttl.as_secs(),
            similar_ids_ttl_secs: settings.similar_ids_ttl.as_secs(),
            write_timeout_ms: u64::try_from(settings.write_timeout.as_millis()).unwrap_or(u64::MAX),
            writeback_workers: settings.writeback_workers.get(),
            writeback_queue: settings.writeback_queue.get(),
        }
    }
}

impl CacheConfig {
    pub fn posts_ttl(&self) -> Duration {
        Duration::from_secs(self.posts_ttl_secs)
    }

    pub fn authors_ttl(&self) -> Duration {
        Duration::from_secs(self.authors_ttl_secs)
    }

    pub fn similar_ttl(&self) -> Duration {
        Duration::from_secs(self.similar_ttl_secs)
    }

    pub fn similar_ids_ttl(&self) -> Duration {
        Duration::from_secs(self.similar_ids_ttl_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Returns the memory capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }

    /// Worker count, at least one.
    pub fn workers(&self) -> usize {
        self.writeback_workers.max(1)
    }

    /// Queue depth, at least one.
    pub fn queue_depth(&self) -> usize {
        self.writeback_queue.max(1)
    }
}
