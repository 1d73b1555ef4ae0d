//! Download engine split into focused submodules.
//!
//! The [`Downloader`] struct and its methods are organized by domain:
//! - [`fetch`] - Fetch worker and the [`ArtifactFetcher`] seam
//! - [`coordinator`] - Bounded worker pool and the run loop
//! - [`stats`] - Live run counters shared with the monitor

mod coordinator;
pub mod fetch;
mod stats;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use fetch::{ArtifactFetcher, FetchOutcome, FetchWorker};
pub use stats::{RunStats, StatsSnapshot};

use std::sync::Arc;

use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::types::Event;

/// Capacity of the event channel; slow subscribers see `RecvError::Lagged`
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Download coordinator handle (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Downloader {
    /// Local index (shared with the monitor and CLI)
    pub db: Arc<Database>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Retrieval backend used by every worker
    pub(crate) fetcher: Arc<dyn ArtifactFetcher>,
    /// Live counters for the current run
    pub(crate) stats: Arc<RunStats>,
}

impl Downloader {
    /// Create a downloader that fetches over HTTP
    ///
    /// Validates the configuration and checks that the cache root is
    /// writable, so a bad setup fails here instead of inside the run.
    pub async fn new(config: Config, db: Arc<Database>) -> Result<Self> {
        config.validate()?;
        let worker = FetchWorker::new(&config)?;
        worker.layout().prepare().await?;

        tracing::info!(
            cache_dir = %worker.layout().root().display(),
            workers = config.download.workers,
            "Downloader initialized"
        );

        Ok(Self::with_fetcher(config, db, Arc::new(worker)))
    }

    /// Create a downloader with a custom retrieval backend
    pub fn with_fetcher(config: Config, db: Arc<Database>, fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        let (event_tx, _rx) = tokio::sync::broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            db,
            event_tx,
            config: Arc::new(config),
            fetcher,
            stats: Arc::new(RunStats::new()),
        }
    }

    /// Subscribe to run events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    /// Events are buffered, but if a subscriber falls behind by more than 1000 events,
    /// it will receive a `RecvError::Lagged` error.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Live counters of the current (or last) run
    pub fn stats(&self) -> Arc<RunStats> {
        Arc::clone(&self.stats)
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers, the event is silently dropped.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}
