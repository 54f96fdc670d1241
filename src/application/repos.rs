//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::filter::PostFilter;
use crate::domain::posts::{KeywordSummary, NewPost, PatchPost, Post};
use crate::domain::similarity::PostSimilarityFilter;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
    #[error("upstream service unavailable: {message}")]
    Unavailable { message: String },
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// One page of a listing plus the number of rows matching regardless of limit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostPage {
    pub posts: Vec<Post>,
    pub total: i64,
}

#[async_trait]
pub trait PostsRepo: Send + Sync {
    async fn find_posts(&self, filter: &PostFilter) -> Result<PostPage, RepoError>;

    async fn find_post(&self, id: i64) -> Result<Option<Post>, RepoError>;

    /// Every post id in ascending order.
    async fn all_ids(&self) -> Result<Vec<i64>, RepoError>;

    /// Distinct authors without the stored prefix, ascending.
    async fn list_authors(&self) -> Result<Vec<String>, RepoError>;

    async fn keyword_summary(&self, limit: i64) -> Result<Vec<KeywordSummary>, RepoError>;
}

#[async_trait]
pub trait PostsWriteRepo: Send + Sync {
    /// Inserting an already stored permalink returns the stored post unchanged.
    async fn create_post(&self, post: NewPost) -> Result<Post, RepoError>;

    async fn patch_post(&self, id: i64, patch: &PatchPost) -> Result<(), RepoError>;

    async fn delete_post(&self, id: i64) -> Result<(), RepoError>;
}

/// External nearest-neighbour index over post embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Ids ranked from most to least similar.
    async fn nearest(&self, filter: &PostSimilarityFilter) -> Result<Vec<i64>, RepoError>;

    async fn remove(&self, id: i64) -> Result<(), RepoError>;
}
