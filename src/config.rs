//! Configuration types for caa-mirror

use serde::{Deserialize, Serialize};
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::{Error, Result};

/// Largest accepted `retry.backoff_multiplier`
const MAX_BACKOFF_MULTIPLIER: f64 = 10.0;

/// Largest accepted `retry.initial_delay` and `retry.max_delay`
const MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);

/// Main configuration
///
/// Every field has a default except the paths and connection string that
/// depend on the deployment; those are checked by [`Config::validate`] and the
/// `require_*` accessors before a command starts work.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Local index settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Root directory of the image cache
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Enumeration source settings
    #[serde(default)]
    pub source: SourceConfig,

    /// Download run behavior
    #[serde(default)]
    pub download: DownloadConfig,

    /// Per-record HTTP retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Status monitor endpoint
    #[serde(default)]
    pub monitor: MonitorConfig,
}

/// Local index (SQLite) configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./caa_backup.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Enumeration source configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceConfig {
    /// PostgreSQL connection string of the MusicBrainz database
    #[serde(default)]
    pub url: Option<String>,

    /// Records fetched from the source per batch (default: 1000)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: None,
            batch_size: default_batch_size(),
        }
    }
}

/// What a download run does with records that failed on an earlier run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedRecordPolicy {
    /// Leave FAILED records alone; the operator re-queues them (default)
    #[default]
    Manual,
    /// Re-queue transient failures when the run starts
    RetryTransient,
    /// Re-queue every failure, including 404s, when the run starts
    RetryAll,
}

impl std::str::FromStr for FailedRecordPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "manual" => Ok(Self::Manual),
            "retry_transient" => Ok(Self::RetryTransient),
            "retry_all" => Ok(Self::RetryAll),
            other => Err(format!(
                "unknown failed-record policy '{}' (expected manual, retry-transient or retry-all)",
                other
            )),
        }
    }
}

/// Download run configuration (pool size, batching, HTTP endpoint)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Worker pool size (default: 8)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Pending records read from the index per batch (default: 1000)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Artifact URL template
    ///
    /// Placeholders: `{release_mbid}`, `{caa_id}`, `{ext}`.
    #[serde(default = "default_url_template")]
    pub url_template: String,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Handling of records that failed on an earlier run
    #[serde(default)]
    pub failed_policy: FailedRecordPolicy,

    /// Consecutive cache write failures that stop the run (default: 25, 0 = never)
    #[serde(default = "default_max_disk_failures")]
    pub max_consecutive_disk_failures: u32,

    /// Consecutive index read failures that stop the run (default: 20)
    #[serde(default = "default_max_read_failures")]
    pub max_read_failures: u32,

    /// Pause after a failed index read (default: 500 ms)
    #[serde(default = "default_poll_interval", with = "millis_serde")]
    pub pending_poll_interval: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_size: default_batch_size(),
            url_template: default_url_template(),
            user_agent: default_user_agent(),
            request_timeout: default_request_timeout(),
            failed_policy: FailedRecordPolicy::default(),
            max_consecutive_disk_failures: default_max_disk_failures(),
            max_read_failures: default_max_read_failures(),
            pending_poll_interval: default_poll_interval(),
        }
    }
}

/// Retry behavior for transient fetch failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per record, first request included (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt (default: 1 second)
    #[serde(default = "default_initial_delay", with = "millis_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between attempts (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Status monitor configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Serve `/status` while downloading (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Address to bind (default: 127.0.0.1:8080)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_bind_address(),
        }
    }
}

impl Config {
    /// Load a configuration file (JSON); missing fields take their defaults
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::config(
                "config",
                format!("failed to read config file {}: {}", path.display(), e),
            )
        })?;
        serde_json::from_str(&content).map_err(|e| {
            Error::config(
                "config",
                format!("invalid config file {}: {}", path.display(), e),
            )
        })
    }

    /// Check value ranges that apply to every command
    pub fn validate(&self) -> Result<()> {
        if self.persistence.database_path.as_os_str().is_empty() {
            return Err(Error::config("database_path", "database path is empty"));
        }
        if self.download.workers == 0 {
            return Err(Error::config(
                "download.workers",
                "worker pool size must be greater than 0",
            ));
        }
        if self.download.batch_size == 0 {
            return Err(Error::config(
                "download.batch_size",
                "batch size must be greater than 0",
            ));
        }
        if self.source.batch_size == 0 {
            return Err(Error::config(
                "source.batch_size",
                "batch size must be greater than 0",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::config(
                "retry.max_attempts",
                "at least one attempt is required",
            ));
        }
        if !(1.0..=MAX_BACKOFF_MULTIPLIER).contains(&self.retry.backoff_multiplier) {
            return Err(Error::config(
                "retry.backoff_multiplier",
                format!(
                    "backoff multiplier must be between 1.0 and {}",
                    MAX_BACKOFF_MULTIPLIER
                ),
            ));
        }
        if self.retry.max_delay > MAX_RETRY_DELAY {
            return Err(Error::config(
                "retry.max_delay",
                format!("max delay must not exceed {}s", MAX_RETRY_DELAY.as_secs()),
            ));
        }
        if self.retry.initial_delay > MAX_RETRY_DELAY {
            return Err(Error::config(
                "retry.initial_delay",
                format!(
                    "initial delay must not exceed {}s",
                    MAX_RETRY_DELAY.as_secs()
                ),
            ));
        }
        if self.download.request_timeout.is_zero() {
            return Err(Error::config(
                "download.request_timeout",
                "request timeout must be greater than 0",
            ));
        }
        if !self.download.url_template.contains("{caa_id}") {
            return Err(Error::config(
                "download.url_template",
                "URL template must contain the {caa_id} placeholder",
            ));
        }
        Ok(())
    }

    /// Cache root, or a configuration error when it is not set
    pub fn require_cache_dir(&self) -> Result<&Path> {
        match &self.cache_dir {
            Some(dir) if !dir.as_os_str().is_empty() => Ok(dir),
            _ => Err(Error::config("cache_dir", "cache directory is not set")),
        }
    }

    /// Source connection string, or a configuration error when it is not set
    pub fn require_source_url(&self) -> Result<&str> {
        match self.source.url.as_deref() {
            Some(url) if !url.trim().is_empty() => Ok(url),
            _ => Err(Error::config(
                "source.url",
                "source connection string is not set",
            )),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./caa_backup.db")
}

fn default_batch_size() -> usize {
    1000
}

fn default_workers() -> usize {
    8
}

fn default_url_template() -> String {
    "https://archive.org/download/mbid-{release_mbid}/mbid-{release_mbid}-{caa_id}.jpg".to_string()
}

fn default_user_agent() -> String {
    concat!("caa-mirror/", env!("CARGO_PKG_VERSION"), " (Cover Art Archive Backup)").to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_disk_failures() -> u32 {
    25
}

fn default_max_read_failures() -> u32 {
    20
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
