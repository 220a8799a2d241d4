use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use newshub_rss::config::{Config, DatabaseDriver};
use newshub_rss::feed::FeedFetcher;
use newshub_rss::service::{shutdown_channel, Cleaner, Pipeline, Scheduler, Updater};
use newshub_rss::storage::{Database, DatabaseError, FeedStore, PgDatabase};

#[derive(Parser, Debug)]
#[command(
    name = "newshub-rss",
    about = "Polls subscribed RSS feeds, stores new articles and prunes old ones"
)]
struct Args {
    /// Configuration file (TOML, or JSON when it ends in .json)
    #[arg(short, long, value_name = "FILE", default_value = "cfg.toml")]
    config: PathBuf,

    /// Run one update cycle and one cleanup cycle, then exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    match config.database.driver()? {
        DatabaseDriver::Sqlite => {
            let db = match Database::open(&config.database.connection_string).await {
                Ok(db) => db,
                Err(DatabaseError::Locked) => {
                    anyhow::bail!(
                        "Database '{}' is locked by another process",
                        config.database.connection_string
                    );
                }
                Err(e) => return Err(e).context("Failed to open database"),
            };
            run_service(Arc::new(db), &config, args.once).await
        }
        DatabaseDriver::Postgres => {
            let options = config.database.postgres_options()?;
            let db = PgDatabase::connect(options)
                .await
                .context("Failed to connect to PostgreSQL")?;
            run_service(Arc::new(db), &config, args.once).await
        }
    }
}

/// Wire the pipeline, updater, cleaner and scheduler over `store` and run
/// until a shutdown signal (or one round of each cycle with `--once`).
async fn run_service<S: FeedStore>(store: Arc<S>, config: &Config, once: bool) -> Result<()> {
    let fetcher =
        FeedFetcher::new(&config.fetch_config()).context("Failed to build HTTP client")?;

    let pipeline = Pipeline::spawn(Arc::clone(&store), config.queue_capacity);
    let (trigger, shutdown) = shutdown_channel();

    let updater = Updater::new(
        Arc::clone(&store),
        fetcher,
        pipeline.intake(),
        config.max_concurrent_fetches,
        shutdown.clone(),
    );
    let cleaner = Cleaner::new(Arc::clone(&store), config.articles_max_count);

    if once {
        if let Err(e) = updater.run_update_cycle().await {
            tracing::warn!(error = %e, "Update cycle aborted");
        }
        // Release the producer so the pipeline can drain before cleanup runs
        drop(updater);
        pipeline.close().await;

        if let Err(e) = cleaner.run_cleanup_cycle().await {
            tracing::warn!(error = %e, "Cleanup cycle aborted");
        }
        return Ok(());
    }

    let scheduler = Scheduler::new(
        updater,
        cleaner,
        config.update_interval(),
        config.cleanup_interval(),
    );
    let scheduler_task = tokio::spawn(scheduler.run(shutdown));

    wait_for_shutdown_signal().await?;
    trigger.trigger();

    scheduler_task
        .await
        .context("Scheduler task panicked")?;
    pipeline.close().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolve on SIGTERM or SIGINT (Ctrl-C on non-Unix platforms).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

        tokio::select! {
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down gracefully"),
            _ = sigint.recv() => tracing::info!("Received SIGINT, shutting down gracefully"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        tracing::info!("Received Ctrl-C, shutting down gracefully");
    }

    Ok(())
}
