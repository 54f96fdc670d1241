use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::application::error::AppError;
use crate::application::repos::{PostsRepo, PostsWriteRepo, RepoError};
use crate::application::similarity::SimilarityService;
use crate::domain::filter::PostFilter;
use crate::domain::meta::Meta;
use crate::domain::posts::{CreatePost, KeywordSummary, PatchPost, Post};
use crate::domain::similarity::{DEFAULT_SIMILAR_LIMIT, PostSimilarityFilter};

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 200;
pub const MAX_SIMILAR_LIMIT: i64 = 50;
pub const DEFAULT_KEYWORD_LIMIT: i64 = 50;

/// Page size bounds applied to every listing and similarity request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub default_page_size: i64,
    pub max_page_size: i64,
    pub default_similar: i64,
    pub max_similar: i64,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            default_similar: DEFAULT_SIMILAR_LIMIT,
            max_similar: MAX_SIMILAR_LIMIT,
        }
    }
}

impl From<&crate::config::PaginationSettings> for PageLimits {
    fn from(settings: &crate::config::PaginationSettings) -> Self {
        Self {
            default_page_size: i64::from(settings.default_page_size.get()),
            max_page_size: i64::from(settings.max_page_size.get()),
            default_similar: i64::from(settings.default_similar.get()),
            max_similar: i64::from(settings.max_similar.get()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostsPage {
    pub posts: Vec<Post>,
    pub meta: Meta,
}

/// Entry point for every catalog operation a transport exposes.
#[derive(Clone)]
pub struct CatalogService {
    reader: Arc<dyn PostsRepo>,
    writer: Arc<dyn PostsWriteRepo>,
    similarity: Option<Arc<dyn SimilarityService>>,
    limits: PageLimits,
}

impl CatalogService {
    pub fn new(
        reader: Arc<dyn PostsRepo>,
        writer: Arc<dyn PostsWriteRepo>,
        limits: PageLimits,
    ) -> Self {
        Self {
            reader,
            writer,
            similarity: None,
            limits,
        }
    }

    pub fn with_similarity(mut self, similarity: Arc<dyn SimilarityService>) -> Self {
        self.similarity = Some(similarity);
        self
    }

    pub fn limits(&self) -> PageLimits {
        self.limits
    }

    /// Similarity request around `id` using the configured default limit.
    pub fn similar_to(&self, id: i64) -> PostSimilarityFilter {
        PostSimilarityFilter::new(id).with_limit(self.limits.default_similar)
    }

    pub async fn find_posts(&self, filter: PostFilter) -> Result<PostsPage, AppError> {
        let filter = filter.with_page_size(self.limits.default_page_size, self.limits.max_page_size);
        let page = self
            .reader
            .find_posts(&filter)
            .await
            .map_err(|err| AppError::from_repo("catalog.find_posts", err))?;

        let meta = Meta::for_page(&filter, &page.posts, page.total);
        Ok(PostsPage {
            posts: page.posts,
            meta,
        })
    }

    pub async fn find_post(&self, id: i64) -> Result<Post, AppError> {
        self.reader
            .find_post(id)
            .await
            .map_err(|err| AppError::from_repo("catalog.find_post", err))?
            .ok_or(AppError::NotFound)
    }

    pub async fn create_post(&self, post: CreatePost) -> Result<Post, AppError> {
        let post = post.validate()?;
        self.writer
            .create_post(post)
            .await
            .map_err(|err| AppError::from_repo("catalog.create_post", err))
    }

    pub async fn patch_post(&self, id: i64, patch: PatchPost) -> Result<(), AppError> {
        patch.ensure_not_empty()?;
        self.writer
            .patch_post(id, &patch)
            .await
            .map_err(|err| AppError::from_repo("catalog.patch_post", err))
    }

    /// Deletes from the store, then asks the similarity backend to forget the
    /// post. A similarity failure is logged; the delete itself has committed.
    pub async fn delete_post(&self, id: i64) -> Result<(), AppError> {
        self.writer
            .delete_post(id)
            .await
            .map_err(|err| AppError::from_repo("catalog.delete_post", err))?;

        if let Some(similarity) = &self.similarity
            && let Err(err) = similarity.forget_post(id).await
        {
            warn!(post_id = id, error = %err, "Similarity index kept a deleted post");
        }
        info!(post_id = id, "Post removed from catalog");
        Ok(())
    }

    pub async fn all_ids(&self) -> Result<Vec<i64>, AppError> {
        self.reader
            .all_ids()
            .await
            .map_err(|err| AppError::from_repo("catalog.all_ids", err))
    }

    pub async fn find_similar(&self, filter: PostSimilarityFilter) -> Result<Vec<Post>, AppError> {
        let Some(similarity) = &self.similarity else {
            return Err(AppError::from_repo(
                "catalog.find_similar",
                RepoError::unavailable("no similarity backend configured"),
            ));
        };

        let filter = filter.with_max_limit(self.limits.max_similar);
        similarity
            .find_similar(&filter)
            .await
            .map_err(|err| AppError::from_repo("catalog.find_similar", err))
    }

    pub async fn keyword_summary(&self, limit: Option<i64>) -> Result<Vec<KeywordSummary>, AppError> {
        let limit = limit
            .filter(|limit| *limit > 0)
            .unwrap_or(DEFAULT_KEYWORD_LIMIT);
        self.reader
            .keyword_summary(limit)
            .await
            .map_err(|err| AppError::from_repo("catalog.keyword_summary", err))
    }

    pub async fn authors(&self) -> Result<Vec<String>, AppError> {
        self.reader
            .list_authors()
            .await
            .map_err(|err| AppError::from_repo("catalog.authors", err))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::application::error::ErrorKind;
    use crate::application::repos::PostPage;
    use crate::domain::filter::{PostFilterParams, SortMode};
    use crate::domain::posts::{NewPost, fixtures};

    fn post(id: i64, time: i64) -> Post {
        let mut post = fixtures::create_post(&format!("/r/pics/{id}"))
            .validate()
            .expect("valid post")
            .into_post(id);
        post.time = time;
        post
    }

    #[derive(Default)]
    struct StubReader {
        posts: Vec<Post>,
        total: i64,
        seen: Mutex<Vec<PostFilter>>,
        summary_limits: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl PostsRepo for StubReader {
        async fn find_posts(&self, filter: &PostFilter) -> Result<PostPage, RepoError> {
            self.seen.lock().expect("seen lock").push(filter.clone());
            Ok(PostPage {
                posts: self.posts.clone(),
                total: self.total,
            })
        }

        async fn find_post(&self, id: i64) -> Result<Option<Post>, RepoError> {
            Ok(self.posts.iter().find(|post| post.id == id).cloned())
        }

        async fn all_ids(&self) -> Result<Vec<i64>, RepoError> {
            Ok(self.posts.iter().map(|post| post.id).collect())
        }

        async fn list_authors(&self) -> Result<Vec<String>, RepoError> {
            Err(RepoError::Timeout)
        }

        async fn keyword_summary(&self, limit: i64) -> Result<Vec<KeywordSummary>, RepoError> {
            self.summary_limits.lock().expect("limits lock").push(limit);
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct RecordingWriter {
        created: Mutex<Vec<NewPost>>,
        patched: Mutex<Vec<(i64, PatchPost)>>,
        deleted: Mutex<Vec<i64>>,
        missing: bool,
    }

    #[async_trait]
    impl PostsWriteRepo for RecordingWriter {
        async fn create_post(&self, post: NewPost) -> Result<Post, RepoError> {
            self.created.lock().expect("created lock").push(post.clone());
            Ok(post.into_post(1))
        }

        async fn patch_post(&self, id: i64, patch: &PatchPost) -> Result<(), RepoError> {
            if self.missing {
                return Err(RepoError::NotFound);
            }
            self.patched.lock().expect("patched lock").push((id, patch.clone()));
            Ok(())
        }

        async fn delete_post(&self, id: i64) -> Result<(), RepoError> {
            if self.missing {
                return Err(RepoError::NotFound);
            }
            self.deleted.lock().expect("deleted lock").push(id);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSimilarity {
        forgotten: Mutex<Vec<i64>>,
        limits: Mutex<Vec<i64>>,
        fail_forget: bool,
    }

    #[async_trait]
    impl SimilarityService for RecordingSimilarity {
        async fn find_similar(&self, filter: &PostSimilarityFilter) -> Result<Vec<Post>, RepoError> {
            self.limits.lock().expect("limits lock").push(filter.limit());
            Ok(Vec::new())
        }

        async fn forget_post(&self, id: i64) -> Result<(), RepoError> {
            self.forgotten.lock().expect("forgotten lock").push(id);
            if self.fail_forget {
                return Err(RepoError::unavailable("index offline"));
            }
            Ok(())
        }
    }

    fn catalog(reader: Arc<StubReader>, writer: Arc<RecordingWriter>) -> CatalogService {
        CatalogService::new(reader, writer, PageLimits::default())
    }

    #[tokio::test]
    async fn listing_applies_default_page_size_and_builds_meta() {
        let reader = Arc::new(StubReader {
            posts: vec![post(1, 300), post(2, 200)],
            total: 9,
            ..Default::default()
        });
        let service = catalog(reader.clone(), Arc::default());
        let filter = PostFilter::new(PostFilterParams {
            limit: Some(2),
            ..Default::default()
        })
        .expect("filter");

        let page = service.find_posts(filter).await.expect("page");
        assert_eq!(page.meta.total_posts, 9);
        assert_eq!(page.meta.next_page_id, Some(200));

        let unbounded = PostFilter::new(PostFilterParams::default()).expect("filter");
        service.find_posts(unbounded).await.expect("page");
        let seen = reader.seen.lock().expect("seen lock");
        assert_eq!(seen[1].limit(), Some(DEFAULT_PAGE_SIZE));
    }

    #[tokio::test]
    async fn oversized_pages_are_clamped() {
        let reader = Arc::new(StubReader::default());
        let service = catalog(reader.clone(), Arc::default());
        let filter = PostFilter::new(PostFilterParams {
            limit: Some(10_000),
            sort: Some(SortMode::Score),
            ..Default::default()
        })
        .expect("filter");

        let page = service.find_posts(filter).await.expect("page");
        assert_eq!(page.meta.next_page_id, None);
        assert_eq!(reader.seen.lock().expect("seen lock")[0].limit(), Some(MAX_PAGE_SIZE));
    }

    #[tokio::test]
    async fn missing_post_is_not_found() {
        let service = catalog(Arc::default(), Arc::default());
        let err = service.find_post(404).await.expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn create_rejects_wrong_counts_before_the_store() {
        let writer = Arc::new(RecordingWriter::default());
        let service = catalog(Arc::default(), writer.clone());

        let mut three_images = fixtures::create_post("/r/pics/a");
        three_images.images.pop();
        let err = service.create_post(three_images).await.expect_err("invalid");
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut four_colors = fixtures::create_post("/r/pics/b");
        four_colors.colors.pop();
        let err = service.create_post(four_colors).await.expect_err("invalid");
        assert_eq!(err.kind(), ErrorKind::Validation);

        assert!(writer.created.lock().expect("created lock").is_empty());

        let created = service
            .create_post(fixtures::create_post("/r/pics/c"))
            .await
            .expect("created");
        assert_eq!(created.author, "alice");
    }

    #[tokio::test]
    async fn empty_patch_is_rejected() {
        let writer = Arc::new(RecordingWriter::default());
        let service = catalog(Arc::default(), writer.clone());

        let err = service
            .patch_post(1, PatchPost::default())
            .await
            .expect_err("empty patch");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.public_message().contains("must include patch parameters"));

        let score_only = PatchPost {
            score: Some(7),
            ..Default::default()
        };
        service.patch_post(1, score_only.clone()).await.expect("patched");
        assert_eq!(*writer.patched.lock().expect("patched lock"), [(1, score_only)]);
    }

    #[tokio::test]
    async fn patch_and_delete_of_unknown_ids_are_not_found() {
        let writer = Arc::new(RecordingWriter {
            missing: true,
            ..Default::default()
        });
        let service = catalog(Arc::default(), writer);

        let patch = PatchPost {
            nsfw: Some(true),
            ..Default::default()
        };
        let err = service.patch_post(5, patch).await.expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = service.delete_post(5).await.expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn delete_forgets_similarity_even_when_the_index_fails() {
        let writer = Arc::new(RecordingWriter::default());
        let similarity = Arc::new(RecordingSimilarity {
            fail_forget: true,
            ..Default::default()
        });
        let service = catalog(Arc::default(), writer.clone()).with_similarity(similarity.clone());

        service.delete_post(3).await.expect("delete succeeds");
        assert_eq!(*writer.deleted.lock().expect("deleted lock"), [3]);
        assert_eq!(*similarity.forgotten.lock().expect("forgotten lock"), [3]);
    }

    #[tokio::test]
    async fn similarity_requires_a_backend_and_clamps_limits() {
        let service = catalog(Arc::default(), Arc::default());
        let err = service
            .find_similar(PostSimilarityFilter::new(1))
            .await
            .expect_err("no backend");
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.public_message(), "internal error");

        let similarity = Arc::new(RecordingSimilarity::default());
        let service = service.with_similarity(similarity.clone());
        service
            .find_similar(service.similar_to(1))
            .await
            .expect("similar");
        service
            .find_similar(PostSimilarityFilter::new(1).with_limit(500))
            .await
            .expect("similar");
        assert_eq!(
            *similarity.limits.lock().expect("limits lock"),
            [DEFAULT_SIMILAR_LIMIT, MAX_SIMILAR_LIMIT]
        );
    }

    #[tokio::test]
    async fn keyword_summary_defaults_its_limit_and_internal_errors_are_hidden() {
        let reader = Arc::new(StubReader::default());
        let service = catalog(reader.clone(), Arc::default());

        service.keyword_summary(None).await.expect("summary");
        service.keyword_summary(Some(5)).await.expect("summary");
        assert_eq!(
            *reader.summary_limits.lock().expect("limits lock"),
            [DEFAULT_KEYWORD_LIMIT, 5]
        );

        let err = service.authors().await.expect_err("timeout");
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
