use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Feed store errors.
///
/// Every store call in the update and cleanup cycles surfaces this type. The
/// callers decide the blast radius: enumeration failures abort a cycle, a
/// failure on a single feed or batch only skips that unit of work.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The database file is held by another process
    #[error("Database is locked by another process")]
    Locked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
        {
            return DatabaseError::Locked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Helper Types
// ============================================================================

/// Internal row type for feed queries (articles are attached afterwards)
pub(crate) type FeedRow = (i64, i64, String, String);

/// Internal row type for Article queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleDbRow {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub body: String,
    pub link: String,
    pub date: i64,
    pub is_read: bool,
    pub is_bookmark: bool,
}

impl ArticleDbRow {
    pub(crate) fn into_article(self) -> Article {
        Article {
            id: self.id,
            feed_id: self.feed_id,
            title: self.title,
            body: self.body,
            link: self.link,
            date: self.date,
            is_read: self.is_read,
            is_bookmark: self.is_bookmark,
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A subscribed feed with its stored articles eagerly loaded.
///
/// `name` uses `Arc<str>` because it travels through every pipeline stage
/// for log context.
#[derive(Debug, Clone)]
pub struct Feed {
    pub id: i64,
    pub user_id: i64,
    pub url: String,
    pub name: Arc<str>,
    /// Stored articles, ordered by id (insertion order)
    pub articles: Vec<Article>,
}

/// A stored feed item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub body: String,
    /// Canonical link, the deduplication key within a feed
    pub link: String,
    /// Publication time (Unix seconds)
    pub date: i64,
    pub is_read: bool,
    pub is_bookmark: bool,
}

/// An article that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArticle {
    pub feed_id: i64,
    pub title: String,
    pub body: String,
    pub link: String,
    pub date: i64,
    pub is_read: bool,
    pub is_bookmark: bool,
}

/// Per-user settings row. Only the RSS toggle matters to this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub user_id: i64,
    pub rss_enabled: bool,
}
