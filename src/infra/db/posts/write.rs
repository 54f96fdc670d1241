use async_trait::async_trait;
use sqlx::{PgConnection, Postgres, QueryBuilder};
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::application::repos::{PostsWriteRepo, RepoError};
use crate::domain::filter::PostFilter;
use crate::domain::posts::{Color, Keyword, NewPost, PatchPost, Post};
use crate::infra::db::{map_sqlx_error, settle};

use super::PostgresRepositories;
use super::read::fetch_page;

#[async_trait]
impl PostsWriteRepo for PostgresRepositories {
    async fn create_post(&self, post: NewPost) -> Result<Post, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        let result = insert_post(&mut tx, post).await;
        settle(tx, result).await
    }

    async fn patch_post(&self, id: i64, patch: &PatchPost) -> Result<(), RepoError> {
        if patch.is_empty() {
            return Err(RepoError::InvalidInput {
                message: "must include patch parameters".to_string(),
            });
        }
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        let result = apply_patch(&mut tx, id, patch).await;
        settle(tx, result).await
    }

    async fn delete_post(&self, id: i64) -> Result<(), RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        let result = delete_row(&mut tx, id).await;
        settle(tx, result).await
    }
}

async fn insert_post(conn: &mut PgConnection, post: NewPost) -> Result<Post, RepoError> {
    let images = &post.images;
    let inserted: Option<i64> = sqlx::query_scalar(
        r#"
        INSERT INTO posts (
            url, title, author, permalink, score, nsfw, grayscale, sprocket, time,
            width, height,
            low_url, low_width, low_height,
            medium_url, medium_width, medium_height,
            high_url, high_width, high_height
        )
        VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9,
            $10, $11,
            $12, $13, $14,
            $15, $16, $17,
            $18, $19, $20
        )
        ON CONFLICT (permalink) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(&images.raw.url)
    .bind(&post.title)
    .bind(&post.author)
    .bind(&post.permalink)
    .bind(post.score)
    .bind(post.nsfw)
    .bind(post.grayscale)
    .bind(post.sprocket)
    .bind(post.time)
    .bind(images.raw.width)
    .bind(images.raw.height)
    .bind(&images.low.url)
    .bind(images.low.width)
    .bind(images.low.height)
    .bind(&images.medium.url)
    .bind(images.medium.width)
    .bind(images.medium.height)
    .bind(&images.high.url)
    .bind(images.high.width)
    .bind(images.high.height)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    let Some(id) = inserted else {
        debug!(permalink = %post.permalink, "Permalink already stored; returning existing post");
        return existing_post(conn, &post.permalink).await;
    };

    insert_keywords(conn, id, &post.keywords).await?;
    insert_colors(conn, id, &post.colors).await?;

    info!(post_id = id, permalink = %post.permalink, "Post created");
    Ok(post.into_post(id))
}

async fn existing_post(conn: &mut PgConnection, permalink: &str) -> Result<Post, RepoError> {
    let id: i64 = sqlx::query_scalar("SELECT id FROM posts WHERE permalink = $1")
        .bind(permalink)
        .fetch_one(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

    fetch_page(conn, &PostFilter::by_ids([id]))
        .await?
        .posts
        .into_iter()
        .next()
        .ok_or(RepoError::NotFound)
}

async fn insert_keywords(
    conn: &mut PgConnection,
    post_id: i64,
    keywords: &[Keyword],
) -> Result<(), RepoError> {
    if keywords.is_empty() {
        return Ok(());
    }
    let words: Vec<&str> = keywords.iter().map(|k| k.word.as_str()).collect();
    let weights: Vec<f64> = keywords.iter().map(|k| k.weight).collect();

    sqlx::query(
        r#"
        INSERT INTO keywords (post_id, word, weight)
        SELECT $1, k.word, k.weight
        FROM UNNEST($2::text[], $3::float8[]) AS k(word, weight)
        "#,
    )
    .bind(post_id)
    .bind(words.as_slice())
    .bind(weights.as_slice())
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    Ok(())
}

async fn insert_colors(
    conn: &mut PgConnection,
    post_id: i64,
    colors: &[Color],
) -> Result<(), RepoError> {
    if colors.is_empty() {
        return Ok(());
    }
    let hexes: Vec<&str> = colors.iter().map(|c| c.hex.as_str()).collect();
    let csses: Vec<&str> = colors.iter().map(|c| c.css.as_str()).collect();
    let htmls: Vec<&str> = colors.iter().map(|c| c.html.as_str()).collect();
    let percents: Vec<f64> = colors.iter().map(|c| c.percent).collect();

    sqlx::query(
        r#"
        INSERT INTO colors (post_id, hex, css, html, percent)
        SELECT $1, c.hex, c.css, c.html, c.percent
        FROM UNNEST($2::text[], $3::text[], $4::text[], $5::float8[]) AS c(hex, css, html, percent)
        "#,
    )
    .bind(post_id)
    .bind(hexes.as_slice())
    .bind(csses.as_slice())
    .bind(htmls.as_slice())
    .bind(percents.as_slice())
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    Ok(())
}

async fn apply_patch(conn: &mut PgConnection, id: i64, patch: &PatchPost) -> Result<(), RepoError> {
    let locked: Option<i64> = sqlx::query_scalar("SELECT id FROM posts WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    if locked.is_none() {
        return Err(RepoError::NotFound);
    }

    if patch.touches_post_row() {
        let mut builder = QueryBuilder::<Postgres>::new("UPDATE posts SET ");
        {
            let mut assignments = builder.separated(", ");
            if let Some(score) = patch.score {
                assignments.push("score = ");
                assignments.push_bind_unseparated(score);
            }
            if let Some(nsfw) = patch.nsfw {
                assignments.push("nsfw = ");
                assignments.push_bind_unseparated(nsfw);
            }
            if let Some(grayscale) = patch.grayscale {
                assignments.push("grayscale = ");
                assignments.push_bind_unseparated(grayscale);
            }
            if let Some(sprocket) = patch.sprocket {
                assignments.push("sprocket = ");
                assignments.push_bind_unseparated(sprocket);
            }
        }
        builder.push(" WHERE id = ");
        builder.push_bind(id);
        builder
            .build()
            .execute(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;
    }

    if let Some(keywords) = patch.keywords.as_deref() {
        sqlx::query("DELETE FROM keywords WHERE post_id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;
        insert_keywords(conn, id, keywords).await?;
    }

    if let Some(colors) = patch.colors.as_deref() {
        sqlx::query("DELETE FROM colors WHERE post_id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;
        insert_colors(conn, id, colors).await?;
    }

    record_update_times(conn, id, patch).await?;
    debug!(post_id = id, "Post patched");
    Ok(())
}

/// Upserts one timestamp per patched field category, leaving the others as they were.
async fn record_update_times(
    conn: &mut PgConnection,
    id: i64,
    patch: &PatchPost,
) -> Result<(), RepoError> {
    let now = OffsetDateTime::now_utc();
    let stamp = |touched: bool| touched.then_some(now);

    sqlx::query(
        r#"
        INSERT INTO post_updates (
            post_id, score_updated_at, nsfw_updated_at, grayscale_updated_at,
            sprocket_updated_at, colors_updated_at, keywords_updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (post_id) DO UPDATE SET
            score_updated_at = COALESCE(EXCLUDED.score_updated_at, post_updates.score_updated_at),
            nsfw_updated_at = COALESCE(EXCLUDED.nsfw_updated_at, post_updates.nsfw_updated_at),
            grayscale_updated_at = COALESCE(EXCLUDED.grayscale_updated_at, post_updates.grayscale_updated_at),
            sprocket_updated_at = COALESCE(EXCLUDED.sprocket_updated_at, post_updates.sprocket_updated_at),
            colors_updated_at = COALESCE(EXCLUDED.colors_updated_at, post_updates.colors_updated_at),
            keywords_updated_at = COALESCE(EXCLUDED.keywords_updated_at, post_updates.keywords_updated_at)
        "#,
    )
    .bind(id)
    .bind(stamp(patch.score.is_some()))
    .bind(stamp(patch.nsfw.is_some()))
    .bind(stamp(patch.grayscale.is_some()))
    .bind(stamp(patch.sprocket.is_some()))
    .bind(stamp(patch.colors.is_some()))
    .bind(stamp(patch.keywords.is_some()))
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    Ok(())
}

async fn delete_row(conn: &mut PgConnection, id: i64) -> Result<(), RepoError> {
    let deleted: Option<i64> = sqlx::query_scalar("DELETE FROM posts WHERE id = $1 RETURNING id")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

    match deleted {
        None => Err(RepoError::NotFound),
        Some(returned) if returned != id => Err(RepoError::integrity(format!(
            "delete of post {id} reported post {returned}"
        ))),
        Some(_) => {
            info!(post_id = id, "Post deleted");
            Ok(())
        }
    }
}
