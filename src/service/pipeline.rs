//! Parse → dedup → persist stages joined by bounded queues.
//!
//! Each stage is one long-lived task that owns the receiving end of its input
//! queue and the only sender of its output queue. A stage exits when every
//! sender of its input is gone and the queue is drained, which drops its own
//! output sender and lets the next stage finish the same way. Nothing can
//! write to a torn-down queue because teardown only happens once there are no
//! writers left.
//!
//! Work items carry a [`CycleTicket`] from the cycle that produced them. The
//! ticket is dropped when the item is persisted or discarded, so
//! [`CycleTracker::wait`] resolves once a cycle's feeds are fully handled.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::dedup::dedup;
use crate::feed::{parse_document, FeedBody, ParsedFeedDocument};
use crate::storage::{Feed, FeedStore, NewArticle};

/// Completion tracking for the work one update cycle hands to the pipeline.
#[derive(Debug)]
pub struct CycleTracker {
    ticket: CycleTicket,
    done: mpsc::Receiver<()>,
}

/// Held by every in-flight work item of a cycle.
#[derive(Debug, Clone)]
pub struct CycleTicket {
    _guard: mpsc::Sender<()>,
}

impl CycleTracker {
    pub fn new() -> Self {
        let (tx, done) = mpsc::channel(1);
        Self {
            ticket: CycleTicket { _guard: tx },
            done,
        }
    }

    pub fn ticket(&self) -> CycleTicket {
        self.ticket.clone()
    }

    /// Resolve once every ticket handed out has been dropped.
    pub async fn wait(self) {
        let Self { ticket, mut done } = self;
        drop(ticket);
        // Nothing is ever sent; `None` means the last ticket is gone
        let _ = done.recv().await;
    }
}

impl Default for CycleTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Stage A input: a fetched, unread feed document.
#[derive(Debug)]
pub struct FetchedFeed {
    pub feed: Feed,
    pub body: FeedBody,
    pub ticket: CycleTicket,
}

/// Stage B input: a parsed document paired with the feed it came from.
#[derive(Debug)]
pub struct ParsedFeed {
    pub feed: Feed,
    pub document: ParsedFeedDocument,
    pub ticket: CycleTicket,
}

/// Stage C input: the new articles of one feed.
#[derive(Debug)]
pub struct ArticleBatch {
    pub feed_id: i64,
    pub feed_name: Arc<str>,
    pub articles: Vec<NewArticle>,
    pub ticket: CycleTicket,
}

/// Work counters reported when the pipeline is closed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    /// Documents read and parsed successfully
    pub parsed: u64,
    /// Documents dropped because the body could not be read or parsed
    pub dropped: u64,
    /// Batches committed to the store
    pub batches_saved: u64,
    /// Articles committed to the store
    pub articles_saved: u64,
    /// Batches the store rejected
    pub save_failures: u64,
}

impl PipelineStats {
    fn merge(&mut self, other: PipelineStats) {
        self.parsed += other.parsed;
        self.dropped += other.dropped;
        self.batches_saved += other.batches_saved;
        self.articles_saved += other.articles_saved;
        self.save_failures += other.save_failures;
    }
}

/// Running pipeline. Feed it through [`Pipeline::intake`], stop it with
/// [`Pipeline::close`].
#[derive(Debug)]
pub struct Pipeline {
    intake: mpsc::Sender<FetchedFeed>,
    stages: [JoinHandle<PipelineStats>; 3],
}

impl Pipeline {
    /// Spawn the three stage tasks with `capacity`-bounded queues between them.
    pub fn spawn<S: FeedStore>(store: Arc<S>, capacity: usize) -> Self {
        let (intake_tx, intake_rx) = mpsc::channel(capacity);
        let (parsed_tx, parsed_rx) = mpsc::channel(capacity);
        let (batch_tx, batch_rx) = mpsc::channel(capacity);

        let stages = [
            tokio::spawn(parse_stage(intake_rx, parsed_tx)),
            tokio::spawn(dedup_stage(parsed_rx, batch_tx)),
            tokio::spawn(persist_stage(batch_rx, store)),
        ];

        tracing::debug!(capacity, "Pipeline started");
        Self {
            intake: intake_tx,
            stages,
        }
    }

    /// A producer handle for stage A.
    pub fn intake(&self) -> mpsc::Sender<FetchedFeed> {
        self.intake.clone()
    }

    /// Drop the pipeline's own intake sender and wait for A, B and C to drain
    /// and exit, in that order.
    ///
    /// Returns once every producer handle from [`Pipeline::intake`] has also
    /// been dropped, so callers release those first.
    pub async fn close(self) -> PipelineStats {
        drop(self.intake);

        let mut stats = PipelineStats::default();
        for (stage, handle) in ["parse", "dedup", "persist"].into_iter().zip(self.stages) {
            match handle.await {
                Ok(stage_stats) => stats.merge(stage_stats),
                Err(e) => tracing::error!(stage, error = %e, "Pipeline stage panicked"),
            }
        }

        tracing::info!(
            parsed = stats.parsed,
            dropped = stats.dropped,
            articles_saved = stats.articles_saved,
            save_failures = stats.save_failures,
            "Pipeline drained"
        );
        stats
    }
}

/// Stage A: read each body once and parse it. Failures drop the feed for
/// this cycle.
async fn parse_stage(
    mut rx: mpsc::Receiver<FetchedFeed>,
    tx: mpsc::Sender<ParsedFeed>,
) -> PipelineStats {
    let mut stats = PipelineStats::default();

    while let Some(FetchedFeed { feed, body, ticket }) = rx.recv().await {
        let bytes = match body.into_bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(feed_id = feed.id, feed = %feed.name, error = %e, "Failed to read feed body");
                stats.dropped += 1;
                continue;
            }
        };

        let document = match parse_document(&bytes) {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!(feed_id = feed.id, feed = %feed.name, error = %e, "Failed to parse feed");
                stats.dropped += 1;
                continue;
            }
        };

        tracing::debug!(feed_id = feed.id, items = document.items.len(), "Parsed feed");
        stats.parsed += 1;

        if tx.send(ParsedFeed { feed, document, ticket }).await.is_err() {
            tracing::error!("Dedup stage is gone, stopping parse stage");
            break;
        }
    }

    tracing::debug!("Parse stage stopped");
    stats
}

/// Stage B: drop already-stored links, forward non-empty batches.
async fn dedup_stage(
    mut rx: mpsc::Receiver<ParsedFeed>,
    tx: mpsc::Sender<ArticleBatch>,
) -> PipelineStats {
    while let Some(ParsedFeed {
        feed,
        document,
        ticket,
    }) = rx.recv().await
    {
        let articles = dedup(feed.id, &feed.articles, document.items);
        if articles.is_empty() {
            tracing::debug!(feed_id = feed.id, "No new articles");
            continue;
        }

        let batch = ArticleBatch {
            feed_id: feed.id,
            feed_name: feed.name,
            articles,
            ticket,
        };
        if tx.send(batch).await.is_err() {
            tracing::error!("Persist stage is gone, stopping dedup stage");
            break;
        }
    }

    tracing::debug!("Dedup stage stopped");
    PipelineStats::default()
}

/// Stage C: one transactional insert per batch. A rejected batch is logged
/// and dropped. The batch, and its ticket, is released after the insert.
async fn persist_stage<S: FeedStore>(
    mut rx: mpsc::Receiver<ArticleBatch>,
    store: Arc<S>,
) -> PipelineStats {
    let mut stats = PipelineStats::default();

    while let Some(batch) = rx.recv().await {
        match store.save_articles(&batch.articles).await {
            Ok(count) => {
                tracing::info!(
                    feed_id = batch.feed_id,
                    feed = %batch.feed_name,
                    count,
                    "Saved new articles"
                );
                stats.batches_saved += 1;
                stats.articles_saved += count;
            }
            Err(e) => {
                tracing::warn!(
                    feed_id = batch.feed_id,
                    feed = %batch.feed_name,
                    batch_size = batch.articles.len(),
                    error = %e,
                    "Failed to save articles"
                );
                stats.save_failures += 1;
            }
        }
    }

    tracing::debug!("Persist stage stopped");
    stats
}
