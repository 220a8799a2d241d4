use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::cleaner::Cleaner;
use super::shutdown::ShutdownSignal;
use super::updater::Updater;
use crate::storage::FeedStore;

/// Triggers update and cleanup cycles on fixed intervals until shutdown.
///
/// Both cycles run once immediately on start. A tick that arrives while the
/// previous cycle of the same kind is still running is skipped.
pub struct Scheduler<S: FeedStore> {
    updater: Arc<Updater<S>>,
    cleaner: Arc<Cleaner<S>>,
    update_interval: Duration,
    cleanup_interval: Duration,
}

impl<S: FeedStore> Scheduler<S> {
    pub fn new(
        updater: Updater<S>,
        cleaner: Cleaner<S>,
        update_interval: Duration,
        cleanup_interval: Duration,
    ) -> Self {
        Self {
            updater: Arc::new(updater),
            cleaner: Arc::new(cleaner),
            update_interval,
            cleanup_interval,
        }
    }

    /// Run until `shutdown` is triggered, then wait for running cycles.
    ///
    /// Consumes the scheduler: when this returns the updater (and with it the
    /// scheduler's pipeline producer handle) has been dropped.
    pub async fn run(self, mut shutdown: ShutdownSignal) {
        let mut update_timer = tokio::time::interval(self.update_interval);
        update_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cleanup_timer = tokio::time::interval(self.cleanup_interval);
        cleanup_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut update_task: Option<JoinHandle<()>> = None;
        let mut cleanup_task: Option<JoinHandle<()>> = None;

        tracing::info!(
            update_every_secs = self.update_interval.as_secs(),
            cleanup_every_secs = self.cleanup_interval.as_secs(),
            "Scheduler started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.triggered() => {
                    tracing::info!("Scheduler stopping, no new cycles will start");
                    break;
                }

                _ = update_timer.tick() => {
                    if is_running(&update_task) {
                        tracing::warn!("Previous update cycle still running, skipping");
                        continue;
                    }
                    let updater = Arc::clone(&self.updater);
                    update_task = Some(tokio::spawn(async move {
                        if let Err(e) = updater.run_update_cycle().await {
                            tracing::warn!(error = %e, "Update cycle aborted");
                        }
                    }));
                }

                _ = cleanup_timer.tick() => {
                    if is_running(&cleanup_task) {
                        tracing::warn!("Previous cleanup cycle still running, skipping");
                        continue;
                    }
                    let cleaner = Arc::clone(&self.cleaner);
                    cleanup_task = Some(tokio::spawn(async move {
                        if let Err(e) = cleaner.run_cleanup_cycle().await {
                            tracing::warn!(error = %e, "Cleanup cycle aborted");
                        }
                    }));
                }
            }
        }

        for (cycle, task) in [("update", update_task), ("cleanup", cleanup_task)] {
            if let Some(task) = task {
                if let Err(e) = task.await {
                    tracing::error!(cycle, error = %e, "Cycle task panicked");
                }
            }
        }
        tracing::info!("Scheduler stopped");
    }
}

fn is_running(task: &Option<JoinHandle<()>>) -> bool {
    task.as_ref().is_some_and(|t| !t.is_finished())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedFetcher, FetchConfig};
    use crate::service::shutdown::shutdown_channel;
    use crate::service::testing::RecordingStore;
    use crate::storage::Feed;
    use tokio::sync::mpsc;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSS: &str = r#"<?xml version="1.0"?><rss version="2.0"><channel>
        <item><title>One</title><link>https://example.com/1</link></item>
    </channel></rss>"#;

    #[tokio::test]
    async fn test_runs_immediately_and_stops_on_shutdown() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
            .expect(1)
            .mount(&mock_server)
            .await;

        let store = Arc::new(RecordingStore::with_feeds(
            vec![1],
            vec![Feed {
                id: 1,
                user_id: 1,
                url: format!("{}/rss", mock_server.uri()),
                name: Arc::from("Feed"),
                articles: Vec::new(),
            }],
        ));
        let fetcher = FeedFetcher::new(&FetchConfig {
            allow_private_hosts: true,
            ..FetchConfig::default()
        })
        .unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        let (trigger, signal) = shutdown_channel();

        let scheduler = Scheduler::new(
            Updater::new(store.clone(), fetcher, tx, 4, signal.clone()),
            Cleaner::new(store.clone(), 1000),
            Duration::from_secs(3600),
            Duration::from_secs(3600),
        );
        let handle = tokio::spawn(scheduler.run(signal));

        // First tick fires immediately
        let fetched = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.feed.id, 1);

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        // Updater dropped with the scheduler: the queue is closed
        assert!(rx.recv().await.is_none());
    }
}
