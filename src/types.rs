//! Core types for caa-mirror

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Cover Art Archive image identifier (primary key of a record)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaaId(pub i64);

impl CaaId {
    /// Create a new CaaId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for CaaId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<CaaId> for i64 {
    fn from(id: CaaId) -> Self {
        id.0
    }
}

impl std::fmt::Display for CaaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CaaId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for CaaId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for CaaId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for CaaId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Download status of a record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Not yet downloaded (or re-queued)
    Pending,
    /// Artifact fully written to the cache
    Downloaded,
    /// Gave up for this run; see [`FailureKind`]
    Failed,
}

impl Status {
    /// Convert integer status code to Status enum
    ///
    /// Unknown codes map to `Pending` so a corrupt value is retried rather than skipped.
    pub fn from_i32(status: i32) -> Self {
        match status {
            1 => Status::Downloaded,
            2 => Status::Failed,
            _ => Status::Pending,
        }
    }

    /// Convert Status enum to integer for database storage
    pub fn to_i32(&self) -> i32 {
        match self {
            Status::Pending => 0,
            Status::Downloaded => 1,
            Status::Failed => 2,
        }
    }

    /// Lowercase name, as used in logs and the status endpoint
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Downloaded => "downloaded",
            Status::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a record ended up FAILED
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Upstream does not have the artifact, or the record is unusable
    Permanent,
    /// Retries exhausted or the cache write failed
    Transient,
}

impl FailureKind {
    /// Convert integer code to FailureKind
    pub fn from_i32(kind: i32) -> Option<Self> {
        match kind {
            1 => Some(FailureKind::Permanent),
            2 => Some(FailureKind::Transient),
            _ => None,
        }
    }

    /// Convert FailureKind to integer for database storage
    pub fn to_i32(&self) -> i32 {
        match self {
            FailureKind::Permanent => 1,
            FailureKind::Transient => 2,
        }
    }
}

/// A record as produced by the enumeration source (no status yet)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecord {
    /// Cover art id
    pub id: CaaId,
    /// MBID of the release the image belongs to
    pub release_mbid: String,
    /// MIME type reported by the source (e.g. "image/jpeg")
    pub mime_type: Option<String>,
}

impl NewRecord {
    /// Create a record with an explicit MIME type
    pub fn new(id: impl Into<CaaId>, release_mbid: impl Into<String>, mime_type: Option<&str>) -> Self {
        Self {
            id: id.into(),
            release_mbid: release_mbid.into(),
            mime_type: mime_type.map(str::to_string),
        }
    }
}

/// One artifact tracked by the index
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Cover art id
    pub id: CaaId,
    /// MBID of the release the image belongs to
    pub release_mbid: String,
    /// MIME type reported by the source
    pub mime_type: Option<String>,
    /// Current download status
    pub status: Status,
    /// Failure detail when `status` is `Failed`
    pub failure: Option<FailureKind>,
    /// Last failure message
    pub error_message: Option<String>,
    /// HTTP requests spent on the last fetch
    pub attempts: i64,
    /// Insertion sequence (stable processing order)
    pub seq: i64,
}

/// Record counts per status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Records waiting to be downloaded
    pub pending: u64,
    /// Records present in the cache
    pub downloaded: u64,
    /// FAILED records with a permanent failure
    pub failed_permanent: u64,
    /// FAILED records with a transient failure
    pub failed_transient: u64,
}

impl StatusCounts {
    /// Total number of records in the index
    pub fn total(&self) -> u64 {
        self.pending + self.downloaded + self.failed_permanent + self.failed_transient
    }

    /// All FAILED records
    pub fn failed(&self) -> u64 {
        self.failed_permanent + self.failed_transient
    }
}

/// Which FAILED records an operator re-queue resets to PENDING
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequeueScope {
    /// Only transient failures (timeouts, 5xx, disk errors)
    Transient,
    /// Every FAILED record, including 404s
    All,
}

/// Events emitted by a download run
///
/// Subscribe through [`crate::Downloader::subscribe`]. Events are purely
/// observational; dropping them never affects the index.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// The run started
    RunStarted {
        /// PENDING records when the run started
        pending: u64,
        /// Worker pool size
        workers: usize,
    },

    /// A record was written to the cache and marked DOWNLOADED
    Downloaded {
        /// Record id
        id: CaaId,
        /// Final cache path
        path: PathBuf,
        /// Bytes written
        bytes: u64,
    },

    /// A record was marked FAILED
    Failed {
        /// Record id
        id: CaaId,
        /// Failure classification
        kind: FailureKind,
        /// Failure message
        error: String,
    },

    /// The run stopped dispatching and every in-flight worker finished
    Drained {
        /// Final counters
        summary: RunSummary,
    },
}

/// Counters for one download run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Records marked DOWNLOADED during the run
    pub downloaded: u64,
    /// Records marked FAILED with a permanent failure
    pub failed_permanent: u64,
    /// Records marked FAILED with a transient failure
    pub failed_transient: u64,
    /// Records already DOWNLOADED when the run started
    pub skipped: u64,
    /// Records whose worker panicked; they stay PENDING for the next run
    #[serde(default)]
    pub abandoned: u64,
    /// The run stopped on a cancellation request before draining
    pub interrupted: bool,
}

impl RunSummary {
    /// Failures of either kind
    pub fn failed(&self) -> u64 {
        self.failed_permanent + self.failed_transient
    }

    /// Process exit code for this outcome
    ///
    /// `0` when every processed record was downloaded, `2` when the run
    /// drained (or was interrupted) with failures or abandoned records. Fatal
    /// errors never produce a summary; the binary maps them to `1`.
    pub fn exit_code(&self) -> i32 {
        if self.failed() > 0 || self.abandoned > 0 {
            2
        } else {
            0
        }
    }
}
