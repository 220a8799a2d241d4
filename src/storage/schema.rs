use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::DatabaseError;

// ============================================================================
// Database
// ============================================================================

/// SQLite-backed feed store.
///
/// Cloning is cheap (the pool is reference counted) and the pool is safe for
/// concurrent use, so the updater, the pipeline stages and the cleaner all
/// share one handle without extra locking.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Locked` if the file is held by another writer
    /// past the busy timeout, `DatabaseError::Migration` if the schema could
    /// not be created and `DatabaseError::Other` for anything else.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout=5000: SQLite waits up to 5 seconds for locks to release
        // before returning SQLITE_BUSY. Using pragma() makes every pooled
        // connection inherit it.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");

        // An in-memory database is shared-cache; a single connection avoids
        // table-level lock errors between concurrent stage writes.
        let max_connections = if path == ":memory:" { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            let error_string = e.to_string().to_lowercase();
            if error_string.contains("database is locked")
                || error_string.contains("database table is locked")
            {
                DatabaseError::Locked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;
        tracing::debug!(path = %path, "Database opened");
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                user_id INTEGER PRIMARY KEY,
                rss_enabled INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                url TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // No UNIQUE(feed_id, link): deduplication happens in the pipeline
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                link TEXT NOT NULL,
                date INTEGER NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                is_bookmark INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_feeds_user ON feeds(user_id)")
            .execute(&mut *tx)
            .await?;

        // Covers both the eager article load (feed_id) and the retention
        // delete (feed_id + date range)
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_feed_date ON articles(feed_id, date)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
