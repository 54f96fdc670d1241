//! Similar-post lookup.
//!
//! An embedding service plugs in by implementing
//! [`VectorIndex`](crate::application::repos::VectorIndex).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::application::repos::{PostsRepo, RepoError, VectorIndex};
use crate::domain::filter::PostFilter;
use crate::domain::posts::Post;
use crate::domain::similarity::PostSimilarityFilter;

/// Nearest-neighbour lookups returning hydrated posts.
#[async_trait]
pub trait SimilarityService: Send + Sync {
    /// Posts ranked from most to least similar.
    async fn find_similar(&self, filter: &PostSimilarityFilter) -> Result<Vec<Post>, RepoError>;

    /// Drops every trace of a deleted post.
    async fn forget_post(&self, id: i64) -> Result<(), RepoError>;
}

/// Ranks through a [`VectorIndex`] and hydrates the ids from the catalog.
#[derive(Clone)]
pub struct IndexedSimilarity {
    index: Arc<dyn VectorIndex>,
    posts: Arc<dyn PostsRepo>,
}

impl IndexedSimilarity {
    pub fn new(index: Arc<dyn VectorIndex>, posts: Arc<dyn PostsRepo>) -> Self {
        Self { index, posts }
    }
}

#[async_trait]
impl SimilarityService for IndexedSimilarity {
    async fn find_similar(&self, filter: &PostSimilarityFilter) -> Result<Vec<Post>, RepoError> {
        let limit = usize::try_from(filter.limit()).unwrap_or(0);
        let mut ranked = self.index.nearest(filter).await?;
        let mut seen = HashSet::new();
        ranked.retain(|id| !filter.excludes(*id) && seen.insert(*id));
        ranked.truncate(limit);
        if ranked.is_empty() {
            return Ok(Vec::new());
        }

        let rank: HashMap<i64, usize> = ranked
            .iter()
            .enumerate()
            .map(|(position, id)| (*id, position))
            .collect();
        let hydrate = PostFilter::by_ids(ranked.iter().copied()).with_flags(
            filter.nsfw(),
            filter.grayscale(),
            filter.sprocket(),
        );

        let mut posts = self.posts.find_posts(&hydrate).await?.posts;
        posts.sort_by_key(|post| rank.get(&post.id).copied().unwrap_or(usize::MAX));
        debug!(
            post_id = filter.id(),
            ranked = ranked.len(),
            hydrated = posts.len(),
            "Resolved similar posts"
        );
        Ok(posts)
    }

    async fn forget_post(&self, id: i64) -> Result<(), RepoError> {
        self.index.remove(id).await
    }
}
