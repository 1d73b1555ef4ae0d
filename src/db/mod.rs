//! Database layer for caa-mirror
//!
//! The local SQLite index is the single source of truth for which artifacts
//! have been mirrored. Every status change is a single-row statement that
//! commits on its own, so a crash can only ever leave a record PENDING.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`records`] - Record upsert, pending reads and status transitions
//! - [`imports`] - Enumeration run history

use crate::types::{CaaId, FailureKind, Record, Status};
use serde::Serialize;
use sqlx::{FromRow, sqlite::SqlitePool};

mod imports;
mod migrations;
mod records;

/// Raw record row from SQLite
#[derive(Debug, Clone, FromRow)]
pub(crate) struct RecordRow {
    pub(crate) seq: i64,
    pub(crate) caa_id: i64,
    pub(crate) release_mbid: String,
    pub(crate) mime_type: Option<String>,
    pub(crate) status: i32,
    pub(crate) failure_kind: Option<i32>,
    pub(crate) error_message: Option<String>,
    pub(crate) attempts: i64,
}

impl From<RecordRow> for Record {
    fn from(row: RecordRow) -> Self {
        Record {
            id: CaaId(row.caa_id),
            release_mbid: row.release_mbid,
            mime_type: row.mime_type,
            status: Status::from_i32(row.status),
            failure: row.failure_kind.and_then(FailureKind::from_i32),
            error_message: row.error_message,
            attempts: row.attempts,
            seq: row.seq,
        }
    }
}

/// Outcome of one [`Database::upsert_records`] batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertStats {
    /// Records that did not exist before
    pub inserted: u64,
    /// Existing records whose metadata was refreshed
    pub updated: u64,
}

/// Import run record from database
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ImportRun {
    /// Unique database ID
    pub id: i64,
    /// Unix timestamp when the import started
    pub started_at: i64,
    /// Unix timestamp when the import finished (None if it never finished)
    pub finished_at: Option<i64>,
    /// Whether only records newer than the previous import were requested
    pub incremental: bool,
    /// Records read from the source
    pub fetched: i64,
    /// Records inserted into the index
    pub inserted: i64,
    /// Records whose metadata was updated
    pub updated: i64,
}

/// Database handle for caa-mirror
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
