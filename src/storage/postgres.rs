use anyhow::Result;
use async_trait::async_trait;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    PgPool, QueryBuilder,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::store::FeedStore;
use super::types::{Article, ArticleDbRow, DatabaseError, Feed, FeedRow, NewArticle, Settings};

// ============================================================================
// PgDatabase
// ============================================================================

/// PostgreSQL-backed feed store, for deployments that share one database
/// between this service and the rest of the application.
///
/// Same tables and semantics as [`Database`](super::Database); only the SQL
/// dialect differs.
#[derive(Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    /// Connect and run migrations.
    ///
    /// # Errors
    ///
    /// `DatabaseError::Migration` if the schema could not be created,
    /// `DatabaseError::Other` for connection failures.
    pub async fn connect(options: PgConnectOptions) -> Result<Self, DatabaseError> {
        let host = options.get_host().to_string();
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let db = Self { pool };
        db.migrate()
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        tracing::debug!(host = %host, "PostgreSQL store opened");
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                user_id BIGINT PRIMARY KEY,
                rss_enabled BOOLEAN NOT NULL DEFAULT FALSE
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id BIGSERIAL PRIMARY KEY,
                user_id BIGINT NOT NULL,
                name TEXT NOT NULL,
                url TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id BIGSERIAL PRIMARY KEY,
                feed_id BIGINT NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                link TEXT NOT NULL,
                date BIGINT NOT NULL,
                is_read BOOLEAN NOT NULL DEFAULT FALSE,
                is_bookmark BOOLEAN NOT NULL DEFAULT FALSE
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_feeds_user ON feeds(user_id)")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_feed_date ON articles(feed_id, date)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    // ========================================================================
    // Seeding (subscription management lives outside this service)
    // ========================================================================

    pub async fn insert_feed(&self, user_id: i64, name: &str, url: &str) -> Result<i64, DatabaseError> {
        let row: (i64,) =
            sqlx::query_as("INSERT INTO feeds (user_id, name, url) VALUES ($1, $2, $3) RETURNING id")
                .bind(user_id)
                .bind(name)
                .bind(url)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    pub async fn upsert_settings(&self, settings: Settings) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO settings (user_id, rss_enabled) VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE SET rss_enabled = EXCLUDED.rss_enabled
        "#,
        )
        .bind(settings.user_id)
        .bind(settings.rss_enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_articles_for_feed(&self, feed_id: i64) -> Result<Vec<Article>, DatabaseError> {
        let rows = sqlx::query_as::<_, ArticleDbRow>(
            r#"
            SELECT id, feed_id, title, body, link, date, is_read, is_bookmark
            FROM articles
            WHERE feed_id = $1
            ORDER BY id
        "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ArticleDbRow::into_article).collect())
    }

    // ========================================================================
    // Feed Queries
    // ========================================================================

    /// Articles for all `rows` in one `= ANY($1)` query.
    async fn attach_articles(&self, rows: Vec<FeedRow>) -> Result<Vec<Feed>, DatabaseError> {
        let feed_ids: Vec<i64> = rows.iter().map(|row| row.0).collect();
        let articles: Vec<ArticleDbRow> = sqlx::query_as(
            r#"
            SELECT id, feed_id, title, body, link, date, is_read, is_bookmark
            FROM articles
            WHERE feed_id = ANY($1)
            ORDER BY id
        "#,
        )
        .bind(&feed_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_feed: HashMap<i64, Vec<Article>> = HashMap::with_capacity(rows.len());
        for article in articles {
            by_feed
                .entry(article.feed_id)
                .or_default()
                .push(article.into_article());
        }

        Ok(rows
            .into_iter()
            .map(|(id, user_id, name, url)| Feed {
                id,
                user_id,
                url,
                name: Arc::from(name),
                articles: by_feed.remove(&id).unwrap_or_default(),
            })
            .collect())
    }
}

#[async_trait]
impl FeedStore for PgDatabase {
    async fn rss_enabled_user_ids(&self) -> Result<Vec<i64>, DatabaseError> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT user_id FROM settings WHERE rss_enabled ORDER BY user_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn feeds_for_users(&self, user_ids: &[i64]) -> Result<Vec<Feed>, DatabaseError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<FeedRow> = sqlx::query_as(
            "SELECT id, user_id, name, url FROM feeds WHERE user_id = ANY($1) ORDER BY id",
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        self.attach_articles(rows).await
    }

    async fn all_feeds(&self) -> Result<Vec<Feed>, DatabaseError> {
        let rows: Vec<FeedRow> = sqlx::query_as("SELECT id, user_id, name, url FROM feeds ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        self.attach_articles(rows).await
    }

    /// One transaction per batch, inserted in 50-row statements.
    async fn save_articles(&self, articles: &[NewArticle]) -> Result<u64, DatabaseError> {
        if articles.is_empty() {
            return Ok(0);
        }

        const BATCH_SIZE: usize = 50;
        let mut tx = self.pool.begin().await?;
        let mut written: u64 = 0;

        for chunk in articles.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
                "INSERT INTO articles (feed_id, title, body, link, date, is_read, is_bookmark) ",
            );
            builder.push_values(chunk, |mut b, article| {
                b.push_bind(article.feed_id)
                    .push_bind(&article.title)
                    .push_bind(&article.body)
                    .push_bind(&article.link)
                    .push_bind(article.date)
                    .push_bind(article.is_read)
                    .push_bind(article.is_bookmark);
            });

            written += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn delete_stale_articles(&self, feed_id: i64, older_than: i64) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            r#"
            DELETE FROM articles
            WHERE feed_id = $1 AND date < $2 AND NOT is_bookmark AND is_read
        "#,
        )
        .bind(feed_id)
        .bind(older_than)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
