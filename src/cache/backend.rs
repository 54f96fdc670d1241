//! Key/value stores the caches write through.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;

use super::error::CacheError;
use super::lock::mutex_lock;

/// Opaque byte store with per-entry expiry.
///
/// No multi-key atomicity is assumed. `get` distinguishes an absent key
/// (`Ok(None)`) from an unreachable backend (`Err`).
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

const SOURCE: &str = "memory";

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// In-process LRU store. Expired entries are dropped lazily on read.
pub struct MemoryBackend {
    entries: Mutex<LruCache<String, Entry>>,
}

impl MemoryBackend {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        mutex_lock(&self.entries, SOURCE, "contains")
            .peek(key)
            .is_some_and(|entry| entry.expires_at > now)
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        SOURCE
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "get");
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.pop(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let expires_at = Instant::now() + ttl;
        mutex_lock(&self.entries, SOURCE, "set").put(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        mutex_lock(&self.entries, SOURCE, "delete").pop(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(capacity: usize) -> MemoryBackend {
        MemoryBackend::new(NonZeroUsize::new(capacity).expect("non-zero"))
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = backend(4);
        cache
            .set("a", b"one".to_vec(), Duration::from_secs(60))
            .await
            .expect("set");

        assert_eq!(cache.get("a").await.expect("get"), Some(b"one".to_vec()));
        assert_eq!(cache.get("b").await.expect("get"), None);
    }

    #[tokio::test]
    async fn expired_entries_read_as_missing() {
        let cache = backend(4);
        cache
            .set("a", b"one".to_vec(), Duration::ZERO)
            .await
            .expect("set");

        assert_eq!(cache.get("a").await.expect("get"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn least_recently_used_entry_is_evicted() {
        let cache = backend(2);
        let ttl = Duration::from_secs(60);
        cache.set("a", vec![1], ttl).await.expect("set");
        cache.set("b", vec![2], ttl).await.expect("set");
        cache.get("a").await.expect("touch a");
        cache.set("c", vec![3], ttl).await.expect("set");

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let cache = backend(2);
        cache
            .set("a", vec![1], Duration::from_secs(60))
            .await
            .expect("set");
        cache.delete("a").await.expect("delete");
        cache.delete("missing").await.expect("deleting a missing key is fine");

        assert_eq!(cache.get("a").await.expect("get"), None);
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let cache = std::sync::Arc::new(backend(2));
        let poisoner = std::sync::Arc::clone(&cache);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.entries.lock().expect("first lock");
            panic!("poison the cache lock");
        })
        .join();

        assert!(cache.entries.is_poisoned());
        assert_eq!(cache.len(), 0);
    }
}
