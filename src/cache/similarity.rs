use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::application::repos::RepoError;
use crate::application::similarity::SimilarityService;
use crate::domain::posts::Post;
use crate::domain::similarity::PostSimilarityFilter;

use super::config::CacheConfig;
use super::error::CacheError;
use super::keys::{CacheNamespace, Fingerprint};
use super::layer::CacheLayer;

const SEPARATOR: &str = ";";
const INDEX_LOCK_STRIPES: usize = 64;

/// Read-through cache over similarity results with targeted invalidation.
///
/// Each cached result is recorded in a reverse index under the queried id and
/// under every returned id, so forgetting a post can purge every result that
/// mentions it.
pub struct CachedSimilarity {
    inner: Arc<dyn SimilarityService>,
    layer: CacheLayer,
    similar_ttl: Duration,
    index_ttl: Duration,
    index_locks: Arc<IndexLocks>,
}

impl CachedSimilarity {
    pub fn new(inner: Arc<dyn SimilarityService>, layer: CacheLayer, config: &CacheConfig) -> Self {
        Self {
            inner,
            layer,
            similar_ttl: config.similar_ttl(),
            index_ttl: config.similar_ids_ttl(),
            index_locks: Arc::new(IndexLocks::new()),
        }
    }

    pub fn layer(&self) -> &CacheLayer {
        &self.layer
    }
}

#[async_trait]
impl SimilarityService for CachedSimilarity {
    async fn find_similar(&self, filter: &PostSimilarityFilter) -> Result<Vec<Post>, RepoError> {
        let fingerprint = match Fingerprint::of(filter) {
            Ok(fingerprint) => fingerprint,
            Err(err) => {
                warn!(post_id = filter.id(), error = %err, "Bypassing similarity cache for unhashable filter");
                return self.inner.find_similar(filter).await;
            }
        };
        let key = fingerprint.key(CacheNamespace::Similar);

        if let Some(posts) = self
            .layer
            .lookup::<Vec<Post>>(CacheNamespace::Similar, &key)
            .await
        {
            return Ok(posts);
        }

        let posts = self.inner.find_similar(filter).await?;

        let bytes = match serde_json::to_vec(&posts) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.layer
                    .report(CacheNamespace::Similar, "encode", &key, &CacheError::Encode(err));
                return Ok(posts);
            }
        };
        let mut contributors: Vec<i64> = posts.iter().map(|post| post.id).collect();
        contributors.push(filter.id());
        contributors.sort_unstable();
        contributors.dedup();

        let (similar_ttl, index_ttl) = (self.similar_ttl, self.index_ttl);
        let locks = Arc::clone(&self.index_locks);
        self.layer.submit(CacheNamespace::Similar, move |layer| async move {
            // Held until every index entry names this result, so a purge sees all of them.
            let _guards = locks.lock_all(&contributors).await;
            if let Err(err) = layer.backend().set(&key, bytes, similar_ttl).await {
                layer.report(CacheNamespace::Similar, "set", &key, &err);
                return;
            }
            for post_id in &contributors {
                remember_fingerprint(&layer, *post_id, fingerprint.as_str(), index_ttl).await;
            }
        });

        Ok(posts)
    }

    async fn forget_post(&self, id: i64) -> Result<(), RepoError> {
        let locks = Arc::clone(&self.index_locks);
        self.layer
            .submit(CacheNamespace::SimilarIds, move |layer| async move {
                let _guards = locks.lock_all(&[id]).await;
                purge(&layer, id).await;
            });
        self.inner.forget_post(id).await
    }
}

/// Striped locks serializing reverse-index maintenance per post id.
///
/// Index entries are updated by read-modify-write on the backend, so two
/// write-back workers touching the same post id must not interleave.
struct IndexLocks {
    stripes: Vec<Mutex<()>>,
}

impl IndexLocks {
    fn new() -> Self {
        Self {
            stripes: (0..INDEX_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe(post_id: i64) -> usize {
        post_id.rem_euclid(INDEX_LOCK_STRIPES as i64) as usize
    }

    /// Locks the stripes covering `post_ids` in ascending stripe order.
    async fn lock_all(&self, post_ids: &[i64]) -> Vec<MutexGuard<'_, ()>> {
        let mut stripes: Vec<usize> = post_ids.iter().map(|id| Self::stripe(*id)).collect();
        stripes.sort_unstable();
        stripes.dedup();

        let mut guards = Vec::with_capacity(stripes.len());
        for stripe in stripes {
            guards.push(self.stripes[stripe].lock().await);
        }
        guards
    }
}

fn index_key(post_id: i64) -> String {
    CacheNamespace::SimilarIds.key(&post_id.to_string())
}

fn entries(bytes: &[u8]) -> impl Iterator<Item = &str> {
    std::str::from_utf8(bytes)
        .unwrap_or_default()
        .split(SEPARATOR)
        .filter(|entry| !entry.is_empty())
}

/// Appends `fingerprint` to the reverse index of `post_id` unless already listed.
async fn remember_fingerprint(layer: &CacheLayer, post_id: i64, fingerprint: &str, ttl: Duration) {
    let key = index_key(post_id);
    let existing = match layer.backend().get(&key).await {
        Ok(existing) => existing.unwrap_or_default(),
        Err(err) => {
            layer.report(CacheNamespace::SimilarIds, "get", &key, &err);
            return;
        }
    };
    if entries(&existing).any(|entry| entry == fingerprint) {
        return;
    }

    let mut updated: Vec<&str> = entries(&existing).collect();
    updated.push(fingerprint);
    let value = updated.join(SEPARATOR).into_bytes();
    if let Err(err) = layer.backend().set(&key, value, ttl).await {
        layer.report(CacheNamespace::SimilarIds, "set", &key, &err);
    }
}

/// Deletes every similarity result recorded for `post_id`, then the index entry.
async fn purge(layer: &CacheLayer, post_id: i64) {
    let key = index_key(post_id);
    let listed = match layer.backend().get(&key).await {
        Ok(Some(listed)) => listed,
        Ok(None) => return,
        Err(err) => {
            layer.report(CacheNamespace::SimilarIds, "get", &key, &err);
            return;
        }
    };

    let mut purged = 0usize;
    for fingerprint in entries(&listed) {
        layer
            .remove(CacheNamespace::Similar, &CacheNamespace::Similar.key(fingerprint))
            .await;
        purged += 1;
    }
    layer.remove(CacheNamespace::SimilarIds, &key).await;
    debug!(post_id, purged, "Purged similarity results");
}
