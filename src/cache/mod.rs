//! Darkroom Cache System
//!
//! Read-through caches sitting in front of the catalog store:
//!
//! - **Listings**: pages of posts keyed by the fingerprint of the filter
//! - **Similarity**: nearest-neighbour results, plus a reverse index from
//!   post id to the results it appears in so deletes can purge them
//!
//! Misses fall through to the store and are written back by a bounded pool.
//! Backend failures are logged and counted, never returned to callers.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! backend = "memory"        # or "redis" with the `redis` feature
//! memory_capacity = 1024
//! posts_ttl_secs = 14400
//! similar_ttl_secs = 86400
//! # ... see config.rs for all options
//! ```

mod backend;
mod config;
mod error;
mod keys;
mod layer;
mod lock;
mod posts;
#[cfg(feature = "redis")]
mod redis;
mod similarity;
mod writeback;

pub use backend::{CacheBackend, MemoryBackend};
pub use self::config::{CacheBackendKind, CacheConfig};
pub(crate) use self::config::{
    DEFAULT_AUTHORS_TTL_SECS, DEFAULT_MEMORY_CAPACITY, DEFAULT_POSTS_TTL_SECS,
    DEFAULT_SIMILAR_IDS_TTL_SECS, DEFAULT_SIMILAR_TTL_SECS, DEFAULT_WRITEBACK_QUEUE,
    DEFAULT_WRITEBACK_WORKERS, DEFAULT_WRITE_TIMEOUT_MS,
};
pub use error::CacheError;
pub use keys::{CacheNamespace, Fingerprint, KEY_PREFIX};
pub use layer::CacheLayer;
pub use posts::CachedPosts;
#[cfg(feature = "redis")]
pub use redis::RedisBackend;
pub use similarity::CachedSimilarity;
pub use writeback::WriteBackPool;
