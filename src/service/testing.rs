//! In-memory [`FeedStore`] that records writes and fails on demand.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::storage::{DatabaseError, Feed, FeedStore, NewArticle};

#[derive(Debug, Default)]
pub(crate) struct RecordingStore {
    pub user_ids: Vec<i64>,
    pub feeds: Vec<Feed>,
    /// Enumeration calls fail
    pub fail_listing: bool,
    /// `save_articles` fails for batches of this feed
    pub fail_saves_for: Option<i64>,
    /// `delete_stale_articles` fails for this feed
    pub fail_deletes_for: Option<i64>,
    pub saved: Mutex<Vec<Vec<NewArticle>>>,
    pub deletes: Mutex<Vec<(i64, i64)>>,
}

impl RecordingStore {
    pub fn with_feeds(user_ids: Vec<i64>, feeds: Vec<Feed>) -> Self {
        Self {
            user_ids,
            feeds,
            ..Self::default()
        }
    }

    pub fn failing_saves_for(feed_id: i64) -> Self {
        Self {
            fail_saves_for: Some(feed_id),
            ..Self::default()
        }
    }

    pub fn saved_batches(&self) -> Vec<Vec<NewArticle>> {
        self.saved.lock().unwrap().clone()
    }

    /// `(feed_id, older_than)` of every delete call, in call order.
    pub fn delete_calls(&self) -> Vec<(i64, i64)> {
        self.deletes.lock().unwrap().clone()
    }

    fn injected() -> DatabaseError {
        DatabaseError::Other(sqlx::Error::Protocol("injected failure".into()))
    }
}

#[async_trait]
impl FeedStore for RecordingStore {
    async fn rss_enabled_user_ids(&self) -> Result<Vec<i64>, DatabaseError> {
        if self.fail_listing {
            return Err(Self::injected());
        }
        Ok(self.user_ids.clone())
    }

    async fn feeds_for_users(&self, user_ids: &[i64]) -> Result<Vec<Feed>, DatabaseError> {
        if self.fail_listing {
            return Err(Self::injected());
        }
        Ok(self
            .feeds
            .iter()
            .filter(|f| user_ids.contains(&f.user_id))
            .cloned()
            .collect())
    }

    async fn all_feeds(&self) -> Result<Vec<Feed>, DatabaseError> {
        if self.fail_listing {
            return Err(Self::injected());
        }
        Ok(self.feeds.clone())
    }

    async fn save_articles(&self, articles: &[NewArticle]) -> Result<u64, DatabaseError> {
        if articles
            .first()
            .is_some_and(|a| Some(a.feed_id) == self.fail_saves_for)
        {
            return Err(Self::injected());
        }
        self.saved.lock().unwrap().push(articles.to_vec());
        Ok(articles.len() as u64)
    }

    async fn delete_stale_articles(&self, feed_id: i64, older_than: i64) -> Result<u64, DatabaseError> {
        self.deletes.lock().unwrap().push((feed_id, older_than));
        if Some(feed_id) == self.fail_deletes_for {
            return Err(Self::injected());
        }
        Ok(0)
    }
}
