//! # caa-mirror
//!
//! Resumable local mirror of the Cover Art Archive.
//!
//! ## Overview
//!
//! Mirroring runs in two phases that share one SQLite index:
//! - **Import** - enumerate cover art ids and release MBIDs from a
//!   MusicBrainz database into the index ([`importer`])
//! - **Download** - fetch every pending artifact into a file cache with a
//!   bounded worker pool, recording each outcome in the index ([`downloader`])
//!
//! The index is the only record of what has been mirrored. Runs can be
//! interrupted at any point and simply started again; records already
//! downloaded are skipped and records in flight are fetched again.
//!
//! ## Quick Start
//!
//! ```no_run
//! use caa_mirror::{Config, Database, Downloader, shutdown_token};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.cache_dir = Some("/srv/caa".into());
//!
//!     let db = Arc::new(Database::open_existing(&config.persistence.database_path).await?);
//!     let downloader = Downloader::new(config, db).await?;
//!
//!     let summary = downloader.run(shutdown_token()).await?;
//!     println!("downloaded {} artifacts", summary.downloaded);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Cache path layout and atomic writes
pub mod cache;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Download coordinator and fetch workers
pub mod downloader;
/// Error types
pub mod error;
/// Record enumeration from the authoritative source
pub mod importer;
/// Status monitor HTTP endpoint
pub mod monitor;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types and events
pub mod types;
/// Index-driven cache verification
pub mod verify;

// Re-export commonly used types
pub use cache::CacheLayout;
pub use config::{Config, FailedRecordPolicy};
pub use db::Database;
pub use downloader::{ArtifactFetcher, Downloader, FetchOutcome, FetchWorker, RunStats};
pub use error::{DatabaseError, Error, FetchError, Result};
pub use importer::{ImportSummary, Importer, MemorySource, PostgresSource, RecordSource};
pub use types::{
    CaaId, Event, FailureKind, NewRecord, Record, RequeueScope, RunSummary, Status, StatusCounts,
};
pub use verify::{VerifySummary, Verifier};

use tokio_util::sync::CancellationToken;

/// Token that is cancelled on the first termination signal
///
/// Pass it to [`Downloader::run`] so SIGINT/SIGTERM stop dispatching and let
/// in-flight workers finish and be recorded.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        trigger.cancel();
    });
    token
}

/// Wait for a termination signal.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
#[cfg(unix)]
pub async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM, finishing in-flight downloads"),
                _ = sigint.recv() => tracing::info!("Received SIGINT, finishing in-flight downloads"),
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT, finishing in-flight downloads");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM, finishing in-flight downloads");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

/// Wait for a termination signal (Ctrl+C).
#[cfg(not(unix))]
pub async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C, finishing in-flight downloads"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
