use chrono::Utc;
use std::sync::Arc;

use crate::storage::{DatabaseError, FeedStore};

/// Articles must be older than this before cleanup may delete them.
pub const RETENTION_SECS: i64 = 4 * 7 * 24 * 60 * 60;

/// What one cleanup cycle did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupSummary {
    pub feeds_scanned: usize,
    /// Feeds over the ceiling whose delete succeeded
    pub feeds_pruned: usize,
    pub articles_deleted: u64,
    /// Feeds over the ceiling whose delete failed
    pub failures: usize,
}

/// Prunes old, read, non-bookmarked articles from feeds over the ceiling.
pub struct Cleaner<S: FeedStore> {
    store: Arc<S>,
    max_articles: usize,
}

impl<S: FeedStore> Cleaner<S> {
    /// With `max_articles = 0` every feed holding at least one article is
    /// over the ceiling.
    pub fn new(store: Arc<S>, max_articles: usize) -> Self {
        Self { store, max_articles }
    }

    pub async fn run_cleanup_cycle(&self) -> Result<CleanupSummary, DatabaseError> {
        self.run_cleanup_cycle_at(Utc::now().timestamp()).await
    }

    /// Cleanup with an explicit "now" (Unix seconds).
    ///
    /// For every feed holding strictly more than `max_articles` articles,
    /// deletes that feed's articles dated before `now - 4 weeks` that are
    /// read and not bookmarked. A failed delete skips that feed only.
    ///
    /// # Errors
    ///
    /// Loading the feeds failed; nothing was deleted.
    pub async fn run_cleanup_cycle_at(&self, now: i64) -> Result<CleanupSummary, DatabaseError> {
        let mut summary = CleanupSummary::default();
        let feeds = self.store.all_feeds().await?;
        let cutoff = now - RETENTION_SECS;

        for feed in feeds {
            summary.feeds_scanned += 1;
            if feed.articles.len() <= self.max_articles {
                continue;
            }

            match self.store.delete_stale_articles(feed.id, cutoff).await {
                Ok(deleted) => {
                    tracing::debug!(
                        feed_id = feed.id,
                        feed = %feed.name,
                        articles = feed.articles.len(),
                        deleted,
                        "Pruned feed"
                    );
                    summary.feeds_pruned += 1;
                    summary.articles_deleted += deleted;
                }
                Err(e) => {
                    tracing::warn!(
                        feed_id = feed.id,
                        feed = %feed.name,
                        error = %e,
                        "Failed to prune feed"
                    );
                    summary.failures += 1;
                }
            }
        }

        tracing::info!(
            feeds_scanned = summary.feeds_scanned,
            feeds_pruned = summary.feeds_pruned,
            articles_deleted = summary.articles_deleted,
            failures = summary.failures,
            "Cleanup cycle complete"
        );
        Ok(summary)
    }
}
