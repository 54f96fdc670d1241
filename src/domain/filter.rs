//! Request-scoped catalog filters.
//!
//! [`PostFilter`] is built once from loosely typed [`PostFilterParams`] and is
//! immutable afterwards. Construction normalizes every field so that two
//! requests meaning the same thing produce equal values: set-like inputs are
//! sorted and de-duplicated, the author gets its stored prefix, and random
//! ordering always carries a seed.

use std::str::FromStr;

use rand::seq::SliceRandom;
use serde::Serialize;

use super::error::DomainError;
use super::posts::{Post, normalize_author};

/// Seeds handed out when a random ordering is requested without one.
pub const RANDOM_SEEDS: [i64; 38] = [
    11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97, 101, 107,
    113, 131, 137, 149, 167, 173, 179, 191, 197, 227, 233, 239, 251, 257, 263,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    #[default]
    Time,
    Score,
    Random,
}

impl SortMode {
    /// Name used in page URLs.
    pub fn query_name(self) -> &'static str {
        match self {
            SortMode::Time => "latest",
            SortMode::Score => "top",
            SortMode::Random => "random",
        }
    }
}

impl FromStr for SortMode {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "latest" | "time" => Ok(SortMode::Time),
            "top" | "score" => Ok(SortMode::Score),
            "random" => Ok(SortMode::Random),
            other => Err(DomainError::invalid_filter(
                "sort",
                format!("unknown sort `{other}`, expected latest, top or random"),
            )),
        }
    }
}

/// Inclusive numeric range; a missing side is unconstrained.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Bounds<T> {
    pub min: Option<T>,
    pub max: Option<T>,
}

impl<T: PartialOrd + Copy> Bounds<T> {
    fn checked(min: Option<T>, max: Option<T>, field: &'static str) -> Result<Self, DomainError> {
        if let (Some(low), Some(high)) = (min, max)
            && low > high
        {
            return Err(DomainError::invalid_filter(field, "minimum exceeds maximum"));
        }
        Ok(Self { min, max })
    }

    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColorPredicate {
    pub name: String,
    /// A post matches when this color covers strictly more than this share.
    pub min_percent: f64,
}

/// Raw filter input. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostFilterParams {
    pub limit: Option<i64>,
    pub sort: Option<SortMode>,
    pub cursor: Option<i64>,
    pub nsfw: Option<bool>,
    pub grayscale: Option<bool>,
    pub sprocket: Option<bool>,
    pub seed: Option<i64>,
    pub ids: Option<Vec<i64>>,
    pub title: Option<String>,
    pub author: Option<String>,
    /// Paired by position with `min_color_percents`.
    pub colors: Vec<String>,
    pub min_color_percents: Vec<f64>,
    pub keywords: Vec<String>,
    pub min_width: Option<i32>,
    pub max_width: Option<i32>,
    pub min_height: Option<i32>,
    pub max_height: Option<i32>,
    pub min_aspect_ratio: Option<f64>,
    pub max_aspect_ratio: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PostFilter {
    limit: Option<i64>,
    sort: SortMode,
    cursor: Option<i64>,
    nsfw: Option<bool>,
    grayscale: Option<bool>,
    sprocket: Option<bool>,
    seed: Option<i64>,
    ids: Option<Vec<i64>>,
    title: Option<String>,
    author: Option<String>,
    colors: Vec<ColorPredicate>,
    keywords: Vec<String>,
    width: Bounds<i32>,
    height: Bounds<i32>,
    aspect_ratio: Bounds<f64>,
}

impl PostFilter {
    pub fn new(params: PostFilterParams) -> Result<Self, DomainError> {
        Self::with_seed_source(params, pick_seed)
    }

    /// Same as [`PostFilter::new`] with a caller-chosen seed generator.
    pub fn with_seed_source(
        params: PostFilterParams,
        seed_source: impl FnOnce() -> i64,
    ) -> Result<Self, DomainError> {
        let PostFilterParams {
            limit,
            sort,
            cursor,
            nsfw,
            grayscale,
            sprocket,
            seed,
            ids,
            title,
            author,
            colors,
            min_color_percents,
            keywords,
            min_width,
            max_width,
            min_height,
            max_height,
            min_aspect_ratio,
            max_aspect_ratio,
        } = params;

        let sort = sort.unwrap_or_default();
        let seed = match (sort, seed) {
            (SortMode::Random, Some(seed)) if seed > 0 => Some(seed),
            (SortMode::Random, Some(_)) => {
                return Err(DomainError::invalid_filter("seed", "must be positive"));
            }
            (SortMode::Random, None) => Some(seed_source()),
            _ => None,
        };

        if [min_aspect_ratio, max_aspect_ratio]
            .iter()
            .flatten()
            .any(|ratio| !ratio.is_finite())
        {
            return Err(DomainError::invalid_filter(
                "aspect_ratio",
                "must be a finite number",
            ));
        }

        Ok(Self {
            limit: limit.filter(|limit| *limit > 0),
            sort,
            cursor,
            nsfw,
            grayscale,
            sprocket,
            seed,
            ids: ids.map(|mut ids| {
                ids.sort_unstable();
                ids.dedup();
                ids
            }),
            title: non_blank(title),
            author: non_blank(author).map(|author| normalize_author(&author)),
            colors: color_predicates(colors, min_color_percents)?,
            keywords: keyword_set(keywords),
            width: Bounds::checked(min_width, max_width, "width")?,
            height: Bounds::checked(min_height, max_height, "height")?,
            aspect_ratio: Bounds::checked(min_aspect_ratio, max_aspect_ratio, "aspect_ratio")?,
        })
    }

    /// Unordered, unbounded filter matching exactly the given ids.
    pub fn by_ids(ids: impl IntoIterator<Item = i64>) -> Self {
        let mut ids: Vec<i64> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        Self {
            ids: Some(ids),
            ..Self::default()
        }
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

    /// Same filter positioned after `cursor`.
    pub fn with_cursor(&self, cursor: i64) -> Self {
        Self {
            cursor: Some(cursor),
            ..self.clone()
        }
    }

    /// Applies a default page size and caps it at `max`.
    pub fn with_page_size(mut self, default: i64, max: i64) -> Self {
        let limit = self.limit.unwrap_or(default).min(max);
        self.limit = (limit > 0).then_some(limit);
        self
    }

    /// Keyset value of `post` under this filter's ordering.
    pub fn cursor_key(&self, post: &Post) -> i64 {
        match self.sort {
            SortMode::Score => i64::from(post.score),
            SortMode::Time | SortMode::Random => post.time,
        }
    }

    pub fn limit(&self) -> Option<i64> {
        self.limit
    }

    pub fn sort(&self) -> SortMode {
        self.sort
    }

    pub fn cursor(&self) -> Option<i64> {
        self.cursor
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

    /// Present exactly when the sort mode is random.
    pub fn seed(&self) -> Option<i64> {
        self.seed
    }

    pub fn ids(&self) -> Option<&[i64]> {
        self.ids.as_deref()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Stored form including the author prefix.
    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn colors(&self) -> &[ColorPredicate] {
        &self.colors
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn width(&self) -> Bounds<i32> {
        self.width
    }

    pub fn height(&self) -> Bounds<i32> {
        self.height
    }

    pub fn aspect_ratio(&self) -> Bounds<f64> {
        self.aspect_ratio
    }
}

fn pick_seed() -> i64 {
    RANDOM_SEEDS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(RANDOM_SEEDS[0])
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn color_predicates(
    colors: Vec<String>,
    percents: Vec<f64>,
) -> Result<Vec<ColorPredicate>, DomainError> {
    if percents.len() > colors.len() {
        return Err(DomainError::invalid_filter(
            "min_color_percents",
            format!(
                "{} percents supplied for {} colors",
                percents.len(),
                colors.len()
            ),
        ));
    }
    if percents.iter().any(|percent| !percent.is_finite() || *percent < 0.0) {
        return Err(DomainError::invalid_filter(
            "min_color_percents",
            "percents must be finite and non-negative",
        ));
    }

    let padded = percents.into_iter().chain(std::iter::repeat(0.0));
    let mut predicates: Vec<ColorPredicate> = colors
        .into_iter()
        .zip(padded)
        .filter_map(|(name, min_percent)| {
            let name = name.trim().to_string();
            (!name.is_empty()).then_some(ColorPredicate { name, min_percent })
        })
        .collect();

    predicates.sort_by(|a, b| {
        a.name
            .cmp(&b.name)
            .then(a.min_percent.total_cmp(&b.min_percent))
    });
    predicates.dedup();
    Ok(predicates)
}

fn keyword_set(keywords: Vec<String>) -> Vec<String> {
    let mut words: Vec<String> = keywords
        .into_iter()
        .map(|word| word.trim().to_string())
        .filter(|word| !word.is_empty())
        .collect();
    words.sort();
    words.dedup();
    words
}
