//! Record enumeration: bulk-load the index from an authoritative source.
//!
//! A [`RecordSource`] yields finite batches of [`NewRecord`]s; the
//! [`Importer`] upserts each batch in its own transaction, so an import that
//! dies halfway keeps every batch it committed and can simply be run again.
//!
//! - [`PostgresSource`] - the MusicBrainz database (production)
//! - [`MemorySource`] - a fixed list of records (tests and embedding)

mod memory;
mod postgres;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use memory::MemorySource;
pub use postgres::PostgresSource;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::db::{Database, UpsertStats};
use crate::error::Result;
use crate::types::NewRecord;

/// Source of records for an import
#[async_trait::async_trait]
pub trait RecordSource: Send {
    /// Number of records the source will yield, when cheaply known
    async fn total(&mut self) -> Result<Option<u64>>;

    /// Next batch of at most `limit` records; an empty batch means exhausted
    async fn next_batch(&mut self, limit: usize) -> Result<Vec<NewRecord>>;
}

/// Totals of one import
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    /// Records read from the source
    pub fetched: u64,
    /// Records that were new to the index
    pub inserted: u64,
    /// Existing records whose metadata changed
    pub updated: u64,
}

/// Loads records from a [`RecordSource`] into the index
pub struct Importer {
    db: Arc<Database>,
    batch_size: usize,
}

impl Importer {
    /// Create an importer writing to `db` in batches of `batch_size`
    pub fn new(db: Arc<Database>, batch_size: usize) -> Self {
        Self {
            db,
            batch_size: batch_size.max(1),
        }
    }

    /// Lower bound for an incremental import
    ///
    /// The start time of the last import that finished, so uploads made
    /// while that import was running are picked up again. `None` when no
    /// import has finished yet.
    pub async fn watermark(&self) -> Result<Option<DateTime<Utc>>> {
        let last = self.db.last_import().await?;
        Ok(last.and_then(|run| Utc.timestamp_opt(run.started_at, 0).single()))
    }

    /// Drain `source` into the index
    ///
    /// `on_batch` is called with the running totals after each committed
    /// batch. The import is recorded in the index history only when the
    /// source is exhausted without error.
    pub async fn run<S, F>(
        &self,
        source: &mut S,
        incremental: bool,
        mut on_batch: F,
    ) -> Result<ImportSummary>
    where
        S: RecordSource + ?Sized,
        F: FnMut(&ImportSummary) + Send,
    {
        let import_id = self.db.begin_import(incremental).await?;
        let mut summary = ImportSummary::default();

        tracing::info!(
            import_id,
            incremental,
            batch_size = self.batch_size,
            "Import started"
        );

        loop {
            let batch = source.next_batch(self.batch_size).await?;
            if batch.is_empty() {
                break;
            }

            let stats = self.db.upsert_records(&batch).await?;
            summary.fetched += batch.len() as u64;
            summary.inserted += stats.inserted;
            summary.updated += stats.updated;

            tracing::debug!(
                batch = batch.len(),
                inserted = stats.inserted,
                updated = stats.updated,
                total_fetched = summary.fetched,
                "Import batch committed"
            );
            on_batch(&summary);
        }

        self.db
            .finish_import(
                import_id,
                summary.fetched,
                UpsertStats {
                    inserted: summary.inserted,
                    updated: summary.updated,
                },
            )
            .await?;

        tracing::info!(
            import_id,
            fetched = summary.fetched,
            inserted = summary.inserted,
            updated = summary.updated,
            "Import finished"
        );

        Ok(summary)
    }
}
