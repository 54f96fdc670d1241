use async_trait::async_trait;
use sqlx::{PgConnection, Postgres, postgres::PgArguments, query::QueryAs};
use tracing::debug;

use crate::application::repos::{PostPage, PostsRepo, RepoError};
use crate::domain::filter::PostFilter;
use crate::domain::posts::{KeywordSummary, Post, display_author};
use crate::infra::db::{map_sqlx_error, settle};

use super::PostgresRepositories;
use super::query::{CompiledQuery, SqlArg, compile};
use super::types::{KeywordSummaryRow, PostRow};

/// Runs a compiled listing on an open connection or transaction.
pub(super) async fn fetch_page(
    conn: &mut PgConnection,
    filter: &PostFilter,
) -> Result<PostPage, RepoError> {
    let CompiledQuery { sql, args } = compile(filter).into_sql();
    debug!(
        sort = ?filter.sort(),
        arg_count = args.len(),
        limit = ?filter.limit(),
        "Executing post listing"
    );

    let rows = bind_args(sqlx::query_as::<_, PostRow>(&sql), &args)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

    let total = rows.first().map(|row| row.total_count).unwrap_or(0);
    let posts = rows
        .into_iter()
        .map(PostRow::into_post)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PostPage { posts, total })
}

fn bind_args<'q, O>(
    mut query: QueryAs<'q, Postgres, O, PgArguments>,
    args: &'q [SqlArg],
) -> QueryAs<'q, Postgres, O, PgArguments> {
    for arg in args {
        query = match arg {
            SqlArg::Int(value) => query.bind(*value),
            SqlArg::Float(value) => query.bind(*value),
            SqlArg::Bool(value) => query.bind(*value),
            SqlArg::Text(value) => query.bind(value.as_str()),
            SqlArg::IntArray(values) => query.bind(values.as_slice()),
        };
    }
    query
}

#[async_trait]
impl PostsRepo for PostgresRepositories {
    async fn find_posts(&self, filter: &PostFilter) -> Result<PostPage, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        let result = fetch_page(&mut tx, filter).await;
        settle(tx, result).await
    }

    async fn find_post(&self, id: i64) -> Result<Option<Post>, RepoError> {
        let page = self.find_posts(&PostFilter::by_ids([id])).await?;
        Ok(page.posts.into_iter().next())
    }

    async fn all_ids(&self) -> Result<Vec<i64>, RepoError> {
        sqlx::query_scalar::<_, i64>("SELECT id FROM posts ORDER BY id ASC")
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)
    }

    async fn list_authors(&self) -> Result<Vec<String>, RepoError> {
        let authors =
            sqlx::query_scalar::<_, String>("SELECT DISTINCT author FROM posts ORDER BY author ASC")
                .fetch_all(self.pool())
                .await
                .map_err(map_sqlx_error)?;

        Ok(authors
            .iter()
            .map(|author| display_author(author).to_string())
            .collect())
    }

    async fn keyword_summary(&self, limit: i64) -> Result<Vec<KeywordSummary>, RepoError> {
        let rows = sqlx::query_as::<_, KeywordSummaryRow>(
            r#"
            SELECT word, AVG(weight) AS weight, COUNT(*) AS count
            FROM keywords
            GROUP BY word
            ORDER BY count DESC, word ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(KeywordSummary::from).collect())
    }
}
