use async_trait::async_trait;

use super::schema::Database;
use super::types::{DatabaseError, Feed, NewArticle};

/// The store operations the update and cleanup cycles consume.
///
/// Components receive an `Arc<S: FeedStore>` at construction instead of
/// reaching for a process-wide handle, so tests can substitute a store that
/// fails on demand. Implementations must be safe for concurrent callers.
#[async_trait]
pub trait FeedStore: Send + Sync + 'static {
    /// Ids of users with RSS updating enabled.
    async fn rss_enabled_user_ids(&self) -> Result<Vec<i64>, DatabaseError>;

    /// Feeds owned by `user_ids`, articles eagerly loaded.
    async fn feeds_for_users(&self, user_ids: &[i64]) -> Result<Vec<Feed>, DatabaseError>;

    /// Every feed, articles eagerly loaded.
    async fn all_feeds(&self) -> Result<Vec<Feed>, DatabaseError>;

    /// Persist a batch of new articles.
    async fn save_articles(&self, articles: &[NewArticle]) -> Result<u64, DatabaseError>;

    /// Delete `feed_id`'s read, non-bookmarked articles dated before `older_than`.
    async fn delete_stale_articles(&self, feed_id: i64, older_than: i64) -> Result<u64, DatabaseError>;
}

#[async_trait]
impl FeedStore for Database {
    async fn rss_enabled_user_ids(&self) -> Result<Vec<i64>, DatabaseError> {
        self.get_rss_enabled_user_ids().await
    }

    async fn feeds_for_users(&self, user_ids: &[i64]) -> Result<Vec<Feed>, DatabaseError> {
        self.get_feeds_for_users(user_ids).await
    }

    async fn all_feeds(&self) -> Result<Vec<Feed>, DatabaseError> {
        self.get_all_feeds().await
    }

    async fn save_articles(&self, articles: &[NewArticle]) -> Result<u64, DatabaseError> {
        Database::save_articles(self, articles).await
    }

    async fn delete_stale_articles(&self, feed_id: i64, older_than: i64) -> Result<u64, DatabaseError> {
        Database::delete_stale_articles(self, feed_id, older_than).await
    }
}
