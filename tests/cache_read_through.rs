use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use darkroom::application::catalog::{CatalogService, PageLimits};
use darkroom::application::repos::{PostPage, PostsRepo, PostsWriteRepo, RepoError, VectorIndex};
use darkroom::application::similarity::{IndexedSimilarity, SimilarityService};
use darkroom::cache::{
    CacheBackend, CacheConfig, CacheError, CacheLayer, CachedPosts, CachedSimilarity,
    MemoryBackend, WriteBackPool,
};
use darkroom::domain::filter::{PostFilter, PostFilterParams};
use darkroom::domain::posts::{
    Color, Image, ImageSet, Keyword, KeywordSummary, NewPost, PatchPost, Post,
};
use darkroom::domain::similarity::PostSimilarityFilter;

fn image(width: i32) -> Image {
    Image {
        url: format!("https://images.example/{width}.jpg"),
        width,
        height: width * 2 / 3,
    }
}

fn sample_post(id: i64) -> Post {
    Post {
        id,
        title: format!("Frame {id}"),
        author: "alice".to_string(),
        permalink: format!("/r/analog/{id}"),
        score: 10,
        nsfw: false,
        grayscale: false,
        sprocket: false,
        time: 1_700_000_000 + id,
        images: ImageSet {
            low: image(320),
            medium: image(768),
            high: image(1280),
            raw: image(4000),
        },
        colors: vec![Color {
            hex: "#000000".to_string(),
            css: "black".to_string(),
            html: "black".to_string(),
            percent: 0.5,
        }],
        keywords: vec![Keyword {
            word: "street".to_string(),
            weight: 0.9,
        }],
    }
}

/// In-memory store that counts every read and records deletes.
#[derive(Default)]
struct FakeStore {
    posts: HashMap<i64, Post>,
    page_reads: AtomicUsize,
    author_reads: AtomicUsize,
    deleted: std::sync::Mutex<Vec<i64>>,
}

impl FakeStore {
    fn with_posts(ids: &[i64]) -> Self {
        Self {
            posts: ids.iter().map(|id| (*id, sample_post(*id))).collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl PostsRepo for FakeStore {
    async fn find_posts(&self, filter: &PostFilter) -> Result<PostPage, RepoError> {
        self.page_reads.fetch_add(1, Ordering::SeqCst);
        let mut posts: Vec<Post> = match filter.ids() {
            Some(ids) => ids
                .iter()
                .filter_map(|id| self.posts.get(id).cloned())
                .collect(),
            None => self.posts.values().cloned().collect(),
        };
        posts.sort_by(|a, b| b.time.cmp(&a.time));
        let total = posts.len() as i64;
        Ok(PostPage { posts, total })
    }

    async fn find_post(&self, id: i64) -> Result<Option<Post>, RepoError> {
        Ok(self.posts.get(&id).cloned())
    }

    async fn all_ids(&self) -> Result<Vec<i64>, RepoError> {
        let mut ids: Vec<i64> = self.posts.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn list_authors(&self) -> Result<Vec<String>, RepoError> {
        self.author_reads.fetch_add(1, Ordering::SeqCst);
        Ok(vec!["alice".to_string()])
    }

    async fn keyword_summary(&self, _limit: i64) -> Result<Vec<KeywordSummary>, RepoError> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl PostsWriteRepo for FakeStore {
    async fn create_post(&self, post: NewPost) -> Result<Post, RepoError> {
        Ok(post.into_post(1))
    }

    async fn patch_post(&self, _id: i64, _patch: &PatchPost) -> Result<(), RepoError> {
        Ok(())
    }

    async fn delete_post(&self, id: i64) -> Result<(), RepoError> {
        self.deleted.lock().expect("deleted lock").push(id);
        Ok(())
    }
}

/// Vector index returning a fixed ranking and counting lookups.
struct FixedIndex {
    ranked: Vec<i64>,
    lookups: AtomicUsize,
}

#[async_trait]
impl VectorIndex for FixedIndex {
    async fn nearest(&self, _filter: &PostSimilarityFilter) -> Result<Vec<i64>, RepoError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.ranked.clone())
    }

    async fn remove(&self, _id: i64) -> Result<(), RepoError> {
        Ok(())
    }
}

/// Backend that fails every call, standing in for an unreachable server.
struct UnreachableBackend;

#[async_trait]
impl CacheBackend for UnreachableBackend {
    fn name(&self) -> &'static str {
        "unreachable"
    }

    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Err(CacheError::backend("unreachable", "connection refused"))
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::backend("unreachable", "connection refused"))
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError::backend("unreachable", "connection refused"))
    }
}

fn layer_over(backend: Arc<dyn CacheBackend>) -> CacheLayer {
    CacheLayer::new(
        backend,
        WriteBackPool::spawn(2, 64, Duration::from_secs(1)),
    )
}

fn memory_backend() -> Arc<MemoryBackend> {
    Arc::new(MemoryBackend::new(
        NonZeroUsize::new(64).expect("non-zero capacity"),
    ))
}

#[tokio::test]
async fn equivalent_filters_share_one_cache_entry() {
    let store = Arc::new(FakeStore::with_posts(&[1, 2, 3]));
    let layer = layer_over(memory_backend());
    let cached = CachedPosts::new(store.clone(), layer.clone(), &CacheConfig::default());

    let first = PostFilter::new(PostFilterParams {
        keywords: vec!["street".into(), "night".into()],
        ids: Some(vec![3, 1, 2]),
        ..Default::default()
    })
    .expect("filter");
    let second = PostFilter::new(PostFilterParams {
        keywords: vec!["night".into(), " street ".into(), "night".into()],
        ids: Some(vec![2, 3, 1, 3]),
        ..Default::default()
    })
    .expect("filter");

    let page = cached.find_posts(&first).await.expect("first read");
    layer.wait_idle().await;
    let again = cached.find_posts(&second).await.expect("second read");

    assert_eq!(page, again);
    assert_eq!(store.page_reads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn authors_are_read_once_within_ttl() {
    let store = Arc::new(FakeStore::with_posts(&[1]));
    let layer = layer_over(memory_backend());
    let cached = CachedPosts::new(store.clone(), layer.clone(), &CacheConfig::default());

    assert_eq!(cached.list_authors().await.expect("authors"), ["alice"]);
    layer.wait_idle().await;
    assert_eq!(cached.list_authors().await.expect("authors"), ["alice"]);

    assert_eq!(store.author_reads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unreachable_backend_still_serves_from_store() {
    let store = Arc::new(FakeStore::with_posts(&[1, 2]));
    let layer = layer_over(Arc::new(UnreachableBackend));
    let cached = CachedPosts::new(store.clone(), layer.clone(), &CacheConfig::default());
    let filter = PostFilter::new(PostFilterParams::default()).expect("filter");

    let page = cached.find_posts(&filter).await.expect("store read");
    layer.wait_idle().await;
    let again = cached.find_posts(&filter).await.expect("store read");

    assert_eq!(page.total, 2);
    assert_eq!(page, again);
    assert_eq!(store.page_reads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn deleting_a_post_purges_similar_results_that_mention_it() {
    let store = Arc::new(FakeStore::with_posts(&[1, 2, 3]));
    let index = Arc::new(FixedIndex {
        ranked: vec![2, 3],
        lookups: AtomicUsize::new(0),
    });
    let backend = memory_backend();
    let layer = layer_over(backend.clone());
    let config = CacheConfig::default();

    let similarity: Arc<dyn SimilarityService> = Arc::new(CachedSimilarity::new(
        Arc::new(IndexedSimilarity::new(index.clone(), store.clone())),
        layer.clone(),
        &config,
    ));
    let catalog = CatalogService::new(store.clone(), store.clone(), PageLimits::default())
        .with_similarity(similarity);

    let first = catalog
        .find_similar(catalog.similar_to(1))
        .await
        .expect("similar posts");
    assert_eq!(first.iter().map(|post| post.id).collect::<Vec<_>>(), [2, 3]);
    layer.wait_idle().await;

    assert!(backend.contains("darkroom:similar-ids:1"));
    assert!(backend.contains("darkroom:similar-ids:2"));
    assert!(backend.contains("darkroom:similar-ids:3"));

    catalog
        .find_similar(catalog.similar_to(1))
        .await
        .expect("cached similar posts");
    assert_eq!(index.lookups.load(Ordering::SeqCst), 1);

    catalog.delete_post(3).await.expect("delete");
    layer.wait_idle().await;

    assert_eq!(*store.deleted.lock().expect("deleted lock"), [3]);
    assert!(!backend.contains("darkroom:similar-ids:3"));

    catalog
        .find_similar(catalog.similar_to(1))
        .await
        .expect("recomputed similar posts");
    assert_eq!(index.lookups.load(Ordering::SeqCst), 2);
}
