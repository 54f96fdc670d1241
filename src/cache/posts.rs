use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::application::repos::{PostPage, PostsRepo, RepoError};
use crate::domain::filter::PostFilter;
use crate::domain::posts::{KeywordSummary, Post};

use super::config::CacheConfig;
use super::keys::{CacheNamespace, Fingerprint};
use super::layer::CacheLayer;

const AUTHORS_KEY: &str = "all";

/// Read-through cache over a listing repository.
///
/// Pages are keyed by the fingerprint of the normalized filter and written
/// back from the pool after the caller already has its result. Lookups by id
/// and the maintenance reads go straight to the store.
pub struct CachedPosts {
    inner: Arc<dyn PostsRepo>,
    layer: CacheLayer,
    posts_ttl: Duration,
    authors_ttl: Duration,
}

impl CachedPosts {
    pub fn new(inner: Arc<dyn PostsRepo>, layer: CacheLayer, config: &CacheConfig) -> Self {
        Self {
            inner,
            layer,
            posts_ttl: config.posts_ttl(),
            authors_ttl: config.authors_ttl(),
        }
    }

    pub fn layer(&self) -> &CacheLayer {
        &self.layer
    }
}

#[async_trait]
impl PostsRepo for CachedPosts {
    async fn find_posts(&self, filter: &PostFilter) -> Result<PostPage, RepoError> {
        let fingerprint = match Fingerprint::of(filter) {
            Ok(fingerprint) => fingerprint,
            Err(err) => {
                warn!(error = %err, "Bypassing listing cache for unhashable filter");
                return self.inner.find_posts(filter).await;
            }
        };
        let key = fingerprint.key(CacheNamespace::Posts);

        if let Some(page) = self.layer.lookup::<PostPage>(CacheNamespace::Posts, &key).await {
            return Ok(page);
        }

        let page = self.inner.find_posts(filter).await?;
        self.layer
            .store_later(CacheNamespace::Posts, key, &page, self.posts_ttl);
        Ok(page)
    }

    async fn find_post(&self, id: i64) -> Result<Option<Post>, RepoError> {
        self.inner.find_post(id).await
    }

    async fn all_ids(&self) -> Result<Vec<i64>, RepoError> {
        self.inner.all_ids().await
    }

    async fn list_authors(&self) -> Result<Vec<String>, RepoError> {
        let key = CacheNamespace::Authors.key(AUTHORS_KEY);
        if let Some(authors) = self
            .layer
            .lookup::<Vec<String>>(CacheNamespace::Authors, &key)
            .await
        {
            return Ok(authors);
        }

        let authors = self.inner.list_authors().await?;
        self.layer
            .store_later(CacheNamespace::Authors, key, &authors, self.authors_ttl);
        Ok(authors)
    }

    async fn keyword_summary(&self, limit: i64) -> Result<Vec<KeywordSummary>, RepoError> {
        self.inner.keyword_summary(limit).await
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::cache::backend::MemoryBackend;
    use crate::cache::writeback::WriteBackPool;
    use crate::domain::filter::{PostFilterParams, SortMode};

    #[derive(Default)]
    struct CountingRepo {
        listings: AtomicUsize,
        author_reads: AtomicUsize,
    }

    #[async_trait]
    impl PostsRepo for CountingRepo {
        async fn find_posts(&self, _filter: &PostFilter) -> Result<PostPage, RepoError> {
            let call = self.listings.fetch_add(1, Ordering::SeqCst) as i64;
            Ok(PostPage {
                posts: Vec::new(),
                total: call + 10,
            })
        }

        async fn find_post(&self, _id: i64) -> Result<Option<Post>, RepoError> {
            Ok(None)
        }

        async fn all_ids(&self) -> Result<Vec<i64>, RepoError> {
            Ok(vec![1, 2])
        }

        async fn list_authors(&self) -> Result<Vec<String>, RepoError> {
            self.author_reads.fetch_add(1, Ordering::SeqCst);
            Ok(vec!["alice".into(), "bob".into()])
        }

        async fn keyword_summary(&self, _limit: i64) -> Result<Vec<KeywordSummary>, RepoError> {
            Ok(Vec::new())
        }
    }

    fn cached(repo: Arc<CountingRepo>) -> CachedPosts {
        let backend = Arc::new(MemoryBackend::new(NonZeroUsize::new(16).expect("non-zero")));
        let layer = CacheLayer::new(backend, WriteBackPool::spawn(1, 16, Duration::from_secs(1)));
        CachedPosts::new(repo, layer, &CacheConfig::default())
    }

    fn filter(sort: SortMode) -> PostFilter {
        PostFilter::new(PostFilterParams {
            sort: Some(sort),
            limit: Some(20),
            ..Default::default()
        })
        .expect("filter")
    }

    #[tokio::test]
    async fn second_identical_listing_is_served_from_cache() {
        let repo = Arc::new(CountingRepo::default());
        let posts = cached(Arc::clone(&repo));

        let first = posts.find_posts(&filter(SortMode::Time)).await.expect("first");
        posts.layer().wait_idle().await;
        let second = posts.find_posts(&filter(SortMode::Time)).await.expect("second");

        assert_eq!(first, second);
        assert_eq!(repo.listings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_listings_miss_separately() {
        let repo = Arc::new(CountingRepo::default());
        let posts = cached(Arc::clone(&repo));

        posts.find_posts(&filter(SortMode::Time)).await.expect("time");
        posts.layer().wait_idle().await;
        let score = posts.find_posts(&filter(SortMode::Score)).await.expect("score");

        assert_eq!(score.total, 11);
        assert_eq!(repo.listings.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn authors_are_cached() {
        let repo = Arc::new(CountingRepo::default());
        let posts = cached(Arc::clone(&repo));

        posts.list_authors().await.expect("authors");
        posts.layer().wait_idle().await;
        let authors = posts.list_authors().await.expect("authors");

        assert_eq!(authors, ["alice", "bob"]);
        assert_eq!(repo.author_reads.load(Ordering::SeqCst), 1);
    }
}
