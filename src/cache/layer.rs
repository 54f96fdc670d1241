use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::backend::CacheBackend;
use super::error::CacheError;
use super::keys::CacheNamespace;
use super::writeback::WriteBackPool;

const METRIC_CACHE_HIT_TOTAL: &str = "darkroom_cache_hit_total";
const METRIC_CACHE_MISS_TOTAL: &str = "darkroom_cache_miss_total";
const METRIC_CACHE_ERROR_TOTAL: &str = "darkroom_cache_error_total";

/// A backend paired with the pool that writes to it in the background.
///
/// Every method is infallible from the caller's point of view: failures are
/// logged, counted and reported as a miss.
#[derive(Clone)]
pub struct CacheLayer {
    backend: Arc<dyn CacheBackend>,
    writeback: WriteBackPool,
}

impl CacheLayer {
    pub fn new(backend: Arc<dyn CacheBackend>, writeback: WriteBackPool) -> Self {
        Self { backend, writeback }
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    pub fn writeback(&self) -> &WriteBackPool {
        &self.writeback
    }

    /// Reads and decodes `key`. `None` covers a miss, a backend failure and an
    /// undecodable entry alike.
    pub async fn lookup<T: DeserializeOwned>(&self, namespace: CacheNamespace, key: &str) -> Option<T> {
        let ns = namespace.as_str();
        let bytes = match self.backend.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(namespace = ns, key, result = "miss", "Cache lookup");
                counter!(METRIC_CACHE_MISS_TOTAL, "namespace" => ns).increment(1);
                return None;
            }
            Err(err) => {
                self.report(namespace, "get", key, &err);
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                debug!(namespace = ns, key, result = "hit", "Cache lookup");
                counter!(METRIC_CACHE_HIT_TOTAL, "namespace" => ns).increment(1);
                Some(value)
            }
            Err(err) => {
                self.report(namespace, "decode", key, &CacheError::Decode(err));
                None
            }
        }
    }

    /// Encodes `value` now and writes it from the pool. Returns `false` when
    /// the write was not queued.
    pub fn store_later<T: Serialize + ?Sized>(
        &self,
        namespace: CacheNamespace,
        key: String,
        value: &T,
        ttl: Duration,
    ) -> bool {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.report(namespace, "encode", &key, &CacheError::Encode(err));
                return false;
            }
        };

        let layer = self.clone();
        self.writeback.submit(namespace, async move {
            if let Err(err) = layer.backend.set(&key, bytes, ttl).await {
                layer.report(namespace, "set", &key, &err);
            }
        })
    }

    /// Queues an arbitrary background job against this layer.
    pub fn submit<F, Fut>(&self, namespace: CacheNamespace, job: F) -> bool
    where
        F: FnOnce(CacheLayer) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.writeback.submit(namespace, job(self.clone()))
    }

    /// Deletes `key`, logging instead of failing.
    pub async fn remove(&self, namespace: CacheNamespace, key: &str) {
        if let Err(err) = self.backend.delete(key).await {
            self.report(namespace, "delete", key, &err);
        }
    }

    /// Resolves once every queued write has finished.
    pub async fn wait_idle(&self) {
        self.writeback.wait_idle().await;
    }

    pub(crate) fn report(&self, namespace: CacheNamespace, op: &'static str, key: &str, err: &CacheError) {
        let ns = namespace.as_str();
        warn!(
            namespace = ns,
            backend = self.backend.name(),
            op,
            key,
            error = %err,
            "Cache operation failed"
        );
        counter!(METRIC_CACHE_ERROR_TOTAL, "namespace" => ns).increment(1);
    }
}
