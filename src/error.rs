//! Error types for caa-mirror
//!
//! This module provides the error taxonomy for the library:
//! - [`Error`] - the crate-wide error, returned by index, import and run operations
//! - [`DatabaseError`] - failures of the local SQLite index
//! - [`FetchError`] - per-record failures inside a fetch worker, classified as
//!   retryable or terminal through [`crate::retry::IsRetryable`]

use std::path::PathBuf;
use thiserror::Error;

use crate::types::CaaId;

/// Result type alias for caa-mirror operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for caa-mirror
///
/// Every variant of this type is fatal to the operation that produced it.
/// Per-record fetch failures never surface here; they are recorded in the
/// index as FAILED records instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "cache_dir")
        key: Option<String>,
    },

    /// Local index operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// Enumeration source failed (connection or query)
    #[error("record source error: {0}")]
    Source(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client could not be constructed
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Cache writes kept failing, so the run was stopped early
    #[error("aborted after {count} consecutive cache write failures (last: {last_error})")]
    DiskFailures {
        /// Number of consecutive failed writes
        count: u32,
        /// Message of the most recent write failure
        last_error: String,
    },

    /// Monitor server error
    #[error("monitor server error: {0}")]
    Monitor(String),
}

impl Error {
    /// Build a configuration error for a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(CaaId),

    /// Status change requested from a state that does not allow it
    #[error("record {id} cannot move to {target}: it is not pending")]
    InvalidTransition {
        /// The record whose transition was rejected
        id: CaaId,
        /// The status that was requested
        target: &'static str,
    },
}

/// Failure of a single artifact fetch
///
/// These never abort a run. The coordinator turns them into FAILED records,
/// using [`FetchError::is_permanent`] to pick the failure kind.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Upstream has no such artifact (HTTP 404)
    #[error("artifact not found upstream ({url})")]
    NotFound {
        /// The URL that returned 404
        url: String,
    },

    /// Upstream answered with a non-success status other than 404
    #[error("unexpected HTTP status {status} from {url}")]
    Status {
        /// The HTTP status code
        status: u16,
        /// The requested URL
        url: String,
    },

    /// Request failed before a response arrived (timeout, connect, reset)
    #[error("request to {url} failed: {source}")]
    Request {
        /// The requested URL
        url: String,
        /// Underlying client error
        #[source]
        source: reqwest::Error,
    },

    /// Upstream answered 200 with an empty body
    #[error("empty response body from {url}")]
    EmptyBody {
        /// The requested URL
        url: String,
    },

    /// Writing the artifact to the cache failed
    #[error("failed to write {path}: {source}")]
    Write {
        /// The final cache path that could not be written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Record metadata cannot produce a URL or cache path
    #[error("invalid record {id}: {reason}")]
    InvalidRecord {
        /// The offending record
        id: CaaId,
        /// Why the metadata was rejected
        reason: String,
    },
}

impl FetchError {
    /// True for failures that must not be retried on a later run automatically
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            FetchError::NotFound { .. } | FetchError::InvalidRecord { .. }
        )
    }

    /// True when the failure came from the local disk rather than the network
    pub fn is_disk_failure(&self) -> bool {
        matches!(self, FetchError::Write { .. })
    }
}
