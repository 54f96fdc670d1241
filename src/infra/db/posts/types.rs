use crate::application::repos::RepoError;
use crate::domain::posts::{Color, Image, ImageSet, Keyword, KeywordSummary, Post, display_author};

#[derive(sqlx::FromRow)]
pub(crate) struct PostRow {
    pub(crate) id: i64,
    pub(crate) url: String,
    pub(crate) title: String,
    pub(crate) author: String,
    pub(crate) permalink: String,
    pub(crate) score: i32,
    pub(crate) nsfw: bool,
    pub(crate) grayscale: bool,
    pub(crate) sprocket: bool,
    pub(crate) time: i64,
    pub(crate) width: i32,
    pub(crate) height: i32,
    pub(crate) low_url: String,
    pub(crate) low_width: i32,
    pub(crate) low_height: i32,
    pub(crate) medium_url: String,
    pub(crate) medium_width: i32,
    pub(crate) medium_height: i32,
    pub(crate) high_url: String,
    pub(crate) high_width: i32,
    pub(crate) high_height: i32,
    pub(crate) hexes: Option<Vec<String>>,
    pub(crate) csses: Option<Vec<String>>,
    pub(crate) htmls: Option<Vec<String>>,
    pub(crate) percents: Option<Vec<f64>>,
    pub(crate) words: Option<Vec<String>>,
    pub(crate) weights: Option<Vec<f64>>,
    pub(crate) total_count: i64,
}

impl PostRow {
    /// Zips the aggregated child columns back into entities.
    pub(crate) fn into_post(self) -> Result<Post, RepoError> {
        let colors = zip_colors(
            self.id,
            self.hexes.unwrap_or_default(),
            self.csses.unwrap_or_default(),
            self.htmls.unwrap_or_default(),
            self.percents.unwrap_or_default(),
        )?;
        let keywords = zip_keywords(
            self.id,
            self.words.unwrap_or_default(),
            self.weights.unwrap_or_default(),
        )?;

        Ok(Post {
            id: self.id,
            title: self.title,
            author: display_author(&self.author).to_string(),
            permalink: self.permalink,
            score: self.score,
            nsfw: self.nsfw,
            grayscale: self.grayscale,
            sprocket: self.sprocket,
            time: self.time,
            images: ImageSet {
                low: Image {
                    url: self.low_url,
                    width: self.low_width,
                    height: self.low_height,
                },
                medium: Image {
                    url: self.medium_url,
                    width: self.medium_width,
                    height: self.medium_height,
                },
                high: Image {
                    url: self.high_url,
                    width: self.high_width,
                    height: self.high_height,
                },
                raw: Image {
                    url: self.url,
                    width: self.width,
                    height: self.height,
                },
            },
            colors,
            keywords,
        })
    }
}

fn zip_colors(
    post_id: i64,
    hexes: Vec<String>,
    csses: Vec<String>,
    htmls: Vec<String>,
    percents: Vec<f64>,
) -> Result<Vec<Color>, RepoError> {
    let len = hexes.len();
    if csses.len() != len || htmls.len() != len || percents.len() != len {
        return Err(RepoError::integrity(format!(
            "color aggregates for post {post_id} have mismatched lengths"
        )));
    }
    Ok(hexes
        .into_iter()
        .zip(csses)
        .zip(htmls)
        .zip(percents)
        .map(|(((hex, css), html), percent)| Color {
            hex,
            css,
            html,
            percent,
        })
        .collect())
}

fn zip_keywords(
    post_id: i64,
    words: Vec<String>,
    weights: Vec<f64>,
) -> Result<Vec<Keyword>, RepoError> {
    if words.len() != weights.len() {
        return Err(RepoError::integrity(format!(
            "keyword aggregates for post {post_id} have mismatched lengths"
        )));
    }
    Ok(words
        .into_iter()
        .zip(weights)
        .map(|(word, weight)| Keyword { word, weight })
        .collect())
}

#[derive(sqlx::FromRow)]
pub(crate) struct KeywordSummaryRow {
    pub(crate) word: String,
    pub(crate) weight: f64,
    pub(crate) count: i64,
}

impl From<KeywordSummaryRow> for KeywordSummary {
    fn from(row: KeywordSummaryRow) -> Self {
        Self {
            word: row.word,
            weight: row.weight,
            count: row.count,
        }
    }
}
