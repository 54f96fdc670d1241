//! Catalog entities: posts and the derived attributes stored with them.

use serde::{Deserialize, Serialize};

use super::error::DomainError;

/// Prefix carried by stored author handles.
pub const AUTHOR_PREFIX: &str = "u/";
pub const REQUIRED_IMAGES: usize = 4;
pub const REQUIRED_COLORS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageVariant {
    Low,
    Medium,
    High,
    Raw,
}

impl ImageVariant {
    /// Order in which variants are supplied on creation.
    pub const ORDERED: [ImageVariant; REQUIRED_IMAGES] = [
        ImageVariant::Low,
        ImageVariant::Medium,
        ImageVariant::High,
        ImageVariant::Raw,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ImageVariant::Low => "low",
            ImageVariant::Medium => "medium",
            ImageVariant::High => "high",
            ImageVariant::Raw => "raw",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub url: String,
    pub width: i32,
    pub height: i32,
}

/// The four resolutions every post is stored with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSet {
    pub low: Image,
    pub medium: Image,
    pub high: Image,
    pub raw: Image,
}

impl ImageSet {
    /// Builds the set from images ordered low, medium, high, raw.
    pub fn from_ordered(images: Vec<Image>) -> Result<Self, DomainError> {
        let count = images.len();
        let [low, medium, high, raw]: [Image; REQUIRED_IMAGES] =
            images.try_into().map_err(|_| {
                DomainError::validation(format!(
                    "expected {REQUIRED_IMAGES} images (low, medium, high, raw), got {count}"
                ))
            })?;
        Ok(Self {
            low,
            medium,
            high,
            raw,
        })
    }

    pub fn get(&self, variant: ImageVariant) -> &Image {
        match variant {
            ImageVariant::Low => &self.low,
            ImageVariant::Medium => &self.medium,
            ImageVariant::High => &self.high,
            ImageVariant::Raw => &self.raw,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ImageVariant, &Image)> {
        ImageVariant::ORDERED
            .into_iter()
            .map(move |variant| (variant, self.get(variant)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub hex: String,
    pub css: String,
    pub html: String,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    pub word: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub author: String,
    pub permalink: String,
    pub score: i32,
    pub nsfw: bool,
    pub grayscale: bool,
    pub sprocket: bool,
    /// Unix seconds at which the photograph was submitted.
    pub time: i64,
    pub images: ImageSet,
    pub colors: Vec<Color>,
    pub keywords: Vec<Keyword>,
}

/// Unvalidated submission as received from a client.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatePost {
    pub title: String,
    pub author: String,
    pub permalink: String,
    pub score: i32,
    pub nsfw: bool,
    pub grayscale: bool,
    pub sprocket: bool,
    pub time: i64,
    pub images: Vec<Image>,
    pub colors: Vec<Color>,
    pub keywords: Vec<Keyword>,
}

/// A submission that passed validation and is ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPost {
    pub title: String,
    /// Stored form, always carrying [`AUTHOR_PREFIX`].
    pub author: String,
    pub permalink: String,
    pub score: i32,
    pub nsfw: bool,
    pub grayscale: bool,
    pub sprocket: bool,
    pub time: i64,
    pub images: ImageSet,
    pub colors: Vec<Color>,
    pub keywords: Vec<Keyword>,
}

impl CreatePost {
    pub fn validate(self) -> Result<NewPost, DomainError> {
        if self.colors.len() != REQUIRED_COLORS {
            return Err(DomainError::validation(format!(
                "expected {REQUIRED_COLORS} colors, got {}",
                self.colors.len()
            )));
        }
        if self.permalink.trim().is_empty() {
            return Err(DomainError::validation("permalink must not be empty"));
        }
        let images = ImageSet::from_ordered(self.images)?;

        Ok(NewPost {
            title: self.title,
            author: normalize_author(&self.author),
            permalink: self.permalink,
            score: self.score,
            nsfw: self.nsfw,
            grayscale: self.grayscale,
            sprocket: self.sprocket,
            time: self.time,
            images,
            colors: self.colors,
            keywords: self.keywords,
        })
    }
}

impl NewPost {
    pub fn into_post(self, id: i64) -> Post {
        Post {
            id,
            title: self.title,
            author: display_author(&self.author).to_string(),
            permalink: self.permalink,
            score: self.score,
            nsfw: self.nsfw,
            grayscale: self.grayscale,
            sprocket: self.sprocket,
            time: self.time,
            images: self.images,
            colors: self.colors,
            keywords: self.keywords,
        }
    }
}

/// Sparse update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchPost {
    pub score: Option<i32>,
    pub nsfw: Option<bool>,
    pub grayscale: Option<bool>,
    pub sprocket: Option<bool>,
    pub colors: Option<Vec<Color>>,
    pub keywords: Option<Vec<Keyword>>,
}

impl PatchPost {
    pub fn is_empty(&self) -> bool {
        self.score.is_none()
            && self.nsfw.is_none()
            && self.grayscale.is_none()
            && self.sprocket.is_none()
            && self.colors.is_none()
            && self.keywords.is_none()
    }

    /// Whether any column of the post row itself changes.
    pub fn touches_post_row(&self) -> bool {
        self.score.is_some()
            || self.nsfw.is_some()
            || self.grayscale.is_some()
            || self.sprocket.is_some()
    }

    pub fn ensure_not_empty(&self) -> Result<(), DomainError> {
        if self.is_empty() {
            return Err(DomainError::validation("must include patch parameters"));
        }
        Ok(())
    }
}

/// Aggregate usage of one keyword across the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordSummary {
    pub word: String,
    pub weight: f64,
    pub count: i64,
}

/// Adds the stored author prefix when missing.
pub fn normalize_author(author: &str) -> String {
    let trimmed = author.trim();
    if trimmed.starts_with(AUTHOR_PREFIX) {
        trimmed.to_string()
    } else {
        format!("{AUTHOR_PREFIX}{trimmed}")
    }
}

/// Strips the stored author prefix for presentation.
pub fn display_author(stored: &str) -> &str {
    stored.strip_prefix(AUTHOR_PREFIX).unwrap_or(stored)
}
