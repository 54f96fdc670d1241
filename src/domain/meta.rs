//! Page metadata returned alongside a listing.

use serde::Serialize;
use url::form_urlencoded;

use super::filter::PostFilter;
use super::posts::{Post, display_author};

pub const POSTS_PATH: &str = "/posts";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Meta {
    pub total_posts: i64,
    pub page_size: i64,
    pub next_page_id: Option<i64>,
    pub next_page_url: Option<String>,
    pub seed: Option<i64>,
}

impl Meta {
    /// A short page means the listing is exhausted and there is no next page.
    pub fn for_page(filter: &PostFilter, posts: &[Post], total_posts: i64) -> Self {
        let returned = i64::try_from(posts.len()).unwrap_or(i64::MAX);
        let page_size = filter.limit().unwrap_or(returned);

        let next_page_id = match (filter.limit(), posts.last()) {
            (Some(limit), Some(last)) if returned == limit => Some(filter.cursor_key(last)),
            _ => None,
        };

        Self {
            total_posts,
            page_size,
            next_page_id,
            next_page_url: next_page_id.map(|cursor| page_url(filter, cursor)),
            seed: filter.seed(),
        }
    }
}

/// Re-serializes `filter` as a listing URL positioned at `cursor`.
pub fn page_url(filter: &PostFilter, cursor: i64) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    query.append_pair("sort", filter.sort().query_name());
    if let Some(limit) = filter.limit() {
        query.append_pair("page_size", &limit.to_string());
    }
    query.append_pair("page_id", &cursor.to_string());
    if let Some(seed) = filter.seed() {
        query.append_pair("seed", &seed.to_string());
    }

    let flags = [
        ("nsfw", filter.nsfw()),
        ("grayscale", filter.grayscale()),
        ("sprocket", filter.sprocket()),
    ];
    for (name, value) in flags {
        if let Some(value) = value {
            query.append_pair(name, if value { "true" } else { "false" });
        }
    }

    if let Some(title) = filter.title() {
        query.append_pair("title", title);
    }
    if let Some(author) = filter.author() {
        query.append_pair("author", display_author(author));
    }
    for id in filter.ids().unwrap_or_default() {
        query.append_pair("ids", &id.to_string());
    }
    for color in filter.colors() {
        query.append_pair("color", &color.name);
        query.append_pair("min_color", &color.min_percent.to_string());
    }
    for keyword in filter.keywords() {
        query.append_pair("keyword", keyword);
    }

    let bounds = [
        ("min_width", filter.width().min),
        ("max_width", filter.width().max),
        ("min_height", filter.height().min),
        ("max_height", filter.height().max),
    ];
    for (name, value) in bounds {
        if let Some(value) = value {
            query.append_pair(name, &value.to_string());
        }
    }
    let ratio = filter.aspect_ratio();
    for (name, value) in [("min_aspect_ratio", ratio.min), ("max_aspect_ratio", ratio.max)] {
        if let Some(value) = value {
            query.append_pair(name, &value.to_string());
        }
    }

    format!("{POSTS_PATH}?{}", query.finish())
}
