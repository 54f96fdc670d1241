use serde::Serialize;

pub const DEFAULT_SIMILAR_LIMIT: i64 = 12;

/// Nearest-neighbour request around one post.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostSimilarityFilter {
    id: i64,
    limit: i64,
    nsfw: Option<bool>,
    grayscale: Option<bool>,
    sprocket: Option<bool>,
    exclude_ids: Vec<i64>,
}

impl PostSimilarityFilter {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            limit: DEFAULT_SIMILAR_LIMIT,
            nsfw: None,
            grayscale: None,
            sprocket: None,
            exclude_ids: vec![id],
        }
    }

    /// Non-positive values keep the current limit.
    pub fn with_limit(mut self, limit: i64) -> Self {
        if limit > 0 {
            self.limit = limit;
        }
        self
    }

    pub fn with_max_limit(mut self, max: i64) -> Self {
        if max > 0 {
            self.limit = self.limit.min(max);
        }
        self
    }

    pub fn with_flags(
        mut self,
        nsfw: Option<bool>,
        grayscale: Option<bool>,
        sprocket: Option<bool>,
    ) -> Self {
        self.nsfw = nsfw;
        self.grayscale = grayscale;
        self.sprocket = sprocket;
        self
    }

    /// Adds ids to the exclusion list. The queried id always stays excluded.
    pub fn excluding(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.exclude_ids.extend(ids);
        self.exclude_ids.push(self.id);
        self.exclude_ids.sort_unstable();
        self.exclude_ids.dedup();
        self
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn nsfw(&self) -> Option<bool> {
        self.nsfw
    }

    pub fn grayscale(&self) -> Option<bool> {
        self.grayscale
    }

    pub fn sprocket(&self) -> Option<bool> {
        self.sprocket
    }

    pub fn exclude_ids(&self) -> &[i64] {
        &self.exclude_ids
    }

    pub fn excludes(&self, id: i64) -> bool {
        self.exclude_ids.binary_search(&id).is_ok()
    }
}
