use futures::stream::{self, StreamExt};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use super::pipeline::{CycleTicket, CycleTracker, FetchedFeed};
use super::shutdown::ShutdownSignal;
use crate::feed::FeedFetcher;
use crate::storage::{DatabaseError, Feed, FeedStore};

/// A store failure while enumerating work; the cycle is abandoned.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("Failed to list RSS-enabled users: {0}")]
    ListUsers(#[source] DatabaseError),

    #[error("Failed to load feeds: {0}")]
    ListFeeds(#[source] DatabaseError),
}

/// What one update cycle did on the fetch side.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpdateSummary {
    /// Feeds selected for this cycle
    pub feeds: usize,
    /// Feeds fetched and handed to the pipeline
    pub fetched: usize,
    /// Feeds whose fetch failed
    pub failed: usize,
    /// Feeds skipped or dropped because shutdown was requested
    pub cancelled: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchOutcome {
    Enqueued,
    Failed,
    Cancelled,
}

/// Fans out one fetch per feed and feeds the results into the pipeline.
pub struct Updater<S: FeedStore> {
    store: Arc<S>,
    fetcher: FeedFetcher,
    intake: mpsc::Sender<FetchedFeed>,
    max_concurrent_fetches: usize,
    shutdown: ShutdownSignal,
}

impl<S: FeedStore> Updater<S> {
    pub fn new(
        store: Arc<S>,
        fetcher: FeedFetcher,
        intake: mpsc::Sender<FetchedFeed>,
        max_concurrent_fetches: usize,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            store,
            fetcher,
            intake,
            max_concurrent_fetches: max_concurrent_fetches.max(1),
            shutdown,
        }
    }

    /// Run one update cycle over a snapshot of the subscribed feeds.
    ///
    /// Returns once every enqueued feed has been parsed, deduplicated and
    /// persisted (or dropped) by the pipeline, so the next cycle never sees a
    /// store that is missing this cycle's articles. Shutdown ends the wait
    /// early; queued work is then drained by [`Pipeline::close`].
    /// A fetch failure only skips that feed.
    ///
    /// [`Pipeline::close`]: super::Pipeline::close
    ///
    /// # Errors
    ///
    /// Listing users or feeds failed; no fetch was started.
    pub async fn run_update_cycle(&self) -> Result<UpdateSummary, UpdateError> {
        let user_ids = self
            .store
            .rss_enabled_user_ids()
            .await
            .map_err(UpdateError::ListUsers)?;
        if user_ids.is_empty() {
            tracing::info!("No users for update");
            return Ok(UpdateSummary::default());
        }

        let feeds = self
            .store
            .feeds_for_users(&user_ids)
            .await
            .map_err(UpdateError::ListFeeds)?;

        let mut summary = UpdateSummary {
            feeds: feeds.len(),
            ..UpdateSummary::default()
        };
        tracing::info!(users = user_ids.len(), feeds = feeds.len(), "Starting update cycle");

        let tracker = CycleTracker::new();

        // Same fan-out shape as a bulk refresh: at most N fetches in flight
        let outcomes: Vec<FetchOutcome> = stream::iter(feeds)
            .map(|feed| {
                fetch_and_enqueue(
                    self.fetcher.clone(),
                    feed,
                    tracker.ticket(),
                    self.intake.clone(),
                    self.shutdown.clone(),
                )
            })
            .buffer_unordered(self.max_concurrent_fetches)
            .collect()
            .await;

        tracing::debug!("All feeds fetched, waiting for the pipeline to persist them");
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            biased;
            _ = shutdown.triggered() => {
                tracing::debug!("Shutdown requested, not waiting for pipeline");
            }
            _ = tracker.wait() => {}
        }

        for outcome in outcomes {
            match outcome {
                FetchOutcome::Enqueued => summary.fetched += 1,
                FetchOutcome::Failed => summary.failed += 1,
                FetchOutcome::Cancelled => summary.cancelled += 1,
            }
        }

        tracing::info!(
            feeds = summary.feeds,
            fetched = summary.fetched,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "Update cycle complete"
        );
        Ok(summary)
    }
}

/// Fetch one feed and hand the body to stage A.
///
/// Shutdown is checked before the request and before the send; a body that
/// is not sent is dropped here, which closes it.
async fn fetch_and_enqueue(
    fetcher: FeedFetcher,
    feed: Feed,
    ticket: CycleTicket,
    intake: mpsc::Sender<FetchedFeed>,
    mut shutdown: ShutdownSignal,
) -> FetchOutcome {
    if shutdown.is_triggered() {
        return FetchOutcome::Cancelled;
    }

    let body = tokio::select! {
        biased;
        _ = shutdown.triggered() => return FetchOutcome::Cancelled,
        result = fetcher.fetch(&feed.url) => match result {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(
                    feed_id = feed.id,
                    feed = %feed.name,
                    url = %feed.url,
                    error = %e,
                    "Failed to fetch feed"
                );
                return FetchOutcome::Failed;
            }
        },
    };

    if shutdown.is_triggered() {
        tracing::debug!(feed_id = feed.id, "Shutdown requested, dropping fetched feed");
        return FetchOutcome::Cancelled;
    }

    let feed_id = feed.id;
    tokio::select! {
        biased;
        _ = shutdown.triggered() => {
            tracing::debug!(feed_id, "Shutdown requested while queue was full, dropping fetched feed");
            FetchOutcome::Cancelled
        }
        sent = intake.send(FetchedFeed { feed, body, ticket }) => match sent {
            Ok(()) => FetchOutcome::Enqueued,
            Err(_) => {
                tracing::warn!(feed_id, "Pipeline is closed, dropping fetched feed");
                FetchOutcome::Cancelled
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FetchConfig;
    use crate::service::shutdown::shutdown_channel;
    use crate::service::testing::RecordingStore;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSS: &str = r#"<?xml version="1.0"?><rss version="2.0"><channel>
        <item><title>One</title><link>https://example.com/1</link></item>
    </channel></rss>"#;

    fn fetcher() -> FeedFetcher {
        FeedFetcher::new(&FetchConfig {
            allow_private_hosts: true,
            ..FetchConfig::default()
        })
        .unwrap()
    }

    fn feed(id: i64, user_id: i64, url: String) -> Feed {
        Feed {
            id,
            user_id,
            url,
            name: Arc::from(format!("Feed {}", id)),
            articles: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_no_users_is_a_no_op() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
            .expect(0)
            .mount(&mock_server)
            .await;

        let store = Arc::new(RecordingStore::with_feeds(
            vec![],
            vec![feed(1, 1, format!("{}/a", mock_server.uri()))],
        ));
        let (tx, mut rx) = mpsc::channel(4);
        let (_trigger, signal) = shutdown_channel();
        let updater = Updater::new(store, fetcher(), tx, 4, signal);

        let summary = updater.run_update_cycle().await.unwrap();
        assert_eq!(summary, UpdateSummary::default());

        drop(updater);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_listing_failure_aborts_cycle() {
        let store = Arc::new(RecordingStore {
            fail_listing: true,
            ..RecordingStore::default()
        });
        let (tx, _rx) = mpsc::channel(4);
        let (_trigger, signal) = shutdown_channel();
        let updater = Updater::new(store, fetcher(), tx, 4, signal);

        let err = updater.run_update_cycle().await.unwrap_err();
        assert!(matches!(err, UpdateError::ListUsers(_)));
    }

    #[tokio::test]
    async fn test_failed_fetch_does_not_affect_others() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
            .mount(&mock_server)
            .await;

        let uri = mock_server.uri();
        let store = Arc::new(RecordingStore::with_feeds(
            vec![1, 2],
            vec![
                feed(1, 1, format!("{}/ok", uri)),
                feed(2, 1, format!("{}/missing", uri)),
                feed(3, 2, format!("{}/ok", uri)),
                feed(4, 3, format!("{}/ok", uri)), // user 3 not enabled
            ],
        ));
        let (tx, mut rx) = mpsc::channel(8);
        let (_trigger, signal) = shutdown_channel();
        let updater = Updater::new(store, fetcher(), tx, 2, signal);

        // Stands in for the pipeline; releasing each item completes it
        let collector = tokio::spawn(async move {
            let mut enqueued = Vec::new();
            while let Some(fetched) = rx.recv().await {
                enqueued.push(fetched.feed.id);
            }
            enqueued
        });

        let summary = updater.run_update_cycle().await.unwrap();
        assert_eq!(
            summary,
            UpdateSummary {
                feeds: 3,
                fetched: 2,
                failed: 1,
                cancelled: 0,
            }
        );

        drop(updater);
        let mut enqueued = collector.await.unwrap();
        enqueued.sort();
        assert_eq!(enqueued, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_shutdown_before_cycle_enqueues_nothing() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
            .expect(0)
            .mount(&mock_server)
            .await;

        let store = Arc::new(RecordingStore::with_feeds(
            vec![1],
            vec![feed(1, 1, format!("{}/a", mock_server.uri()))],
        ));
        let (tx, mut rx) = mpsc::channel(4);
        let (trigger, signal) = shutdown_channel();
        let updater = Updater::new(store, fetcher(), tx, 4, signal);

        trigger.trigger();
        let summary = updater.run_update_cycle().await.unwrap();
        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.fetched, 0);

        drop(updater);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_unblocks_send_on_full_queue() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
            .mount(&mock_server)
            .await;

        let uri = mock_server.uri();
        let store = Arc::new(RecordingStore::with_feeds(
            vec![1],
            (1..=3).map(|id| feed(id, 1, format!("{}/{}", uri, id))).collect(),
        ));
        // Capacity 1 and nobody receiving: the second and third sends block
        let (tx, mut rx) = mpsc::channel(1);
        let (trigger, signal) = shutdown_channel();
        let updater = Arc::new(Updater::new(store, fetcher(), tx, 4, signal));

        let cycle = tokio::spawn({
            let updater = Arc::clone(&updater);
            async move { updater.run_update_cycle().await }
        });

        // Let the fetches finish and block on the full queue
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        trigger.trigger();

        let summary = cycle.await.unwrap().unwrap();
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.fetched + summary.cancelled, 3);
        assert!(summary.fetched <= 1);

        drop(updater);
        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, summary.fetched);
    }

    #[tokio::test]
    async fn test_cycle_waits_until_items_are_released() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
            .mount(&mock_server)
            .await;

        let store = Arc::new(RecordingStore::with_feeds(
            vec![1],
            vec![feed(1, 1, format!("{}/a", mock_server.uri()))],
        ));
        let (tx, mut rx) = mpsc::channel(4);
        let (_trigger, signal) = shutdown_channel();
        let updater = Arc::new(Updater::new(store, fetcher(), tx, 4, signal));

        let cycle = tokio::spawn({
            let updater = Arc::clone(&updater);
            async move { updater.run_update_cycle().await }
        });

        // The item sits in the queue, so the cycle cannot have finished
        let held = rx.recv().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(!cycle.is_finished());

        drop(held);
        let summary = cycle.await.unwrap().unwrap();
        assert_eq!(summary.fetched, 1);
    }
}
