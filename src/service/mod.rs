//! The update and retention machinery.
//!
//! - [`updater`] - per-cycle fetch fan-out into the pipeline
//! - [`pipeline`] - parse, dedup and persist stages over bounded queues
//! - [`dedup`] - link-based deduplication and item conversion
//! - [`cleaner`] - retention pruning
//! - [`scheduler`] - interval triggers and graceful stop
//!
//! Every component takes its store as an injected `Arc<S: FeedStore>`.

pub mod cleaner;
pub mod dedup;
pub mod pipeline;
pub mod scheduler;
pub mod shutdown;
pub mod updater;

#[cfg(test)]
mod testing;

pub use cleaner::{CleanupSummary, Cleaner};
pub use dedup::{article_from_item, dedup};
pub use pipeline::{
    ArticleBatch, CycleTicket, CycleTracker, FetchedFeed, ParsedFeed, Pipeline, PipelineStats,
};
pub use scheduler::Scheduler;
pub use shutdown::{shutdown_channel, ShutdownSignal, ShutdownTrigger};
pub use updater::{UpdateError, UpdateSummary, Updater};
