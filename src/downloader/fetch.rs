//! Fetch worker: one record in, one outcome out.
//!
//! The worker owns the HTTP retrieval, payload validation and the atomic cache
//! write. It never touches the index; the coordinator records the returned
//! [`FetchOutcome`].

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::cache::{self, CacheLayout};
use crate::config::{Config, RetryConfig};
use crate::error::{FetchError, Result};
use crate::retry::download_with_retry;
use crate::types::{FailureKind, Record};

/// Result of fetching one record
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The artifact is in the cache at `path`
    Downloaded {
        /// Final cache path
        path: PathBuf,
        /// Bytes written
        bytes: u64,
        /// HTTP requests made
        attempts: u32,
    },

    /// Upstream answered 404
    NotFound {
        /// Failure message
        error: String,
        /// HTTP requests made (always 1)
        attempts: u32,
    },

    /// Any other failure
    Failed {
        /// Whether a later run may succeed without operator action
        kind: FailureKind,
        /// Failure message
        error: String,
        /// HTTP requests made
        attempts: u32,
        /// The failure came from writing the cache file
        disk: bool,
    },
}

impl FetchOutcome {
    /// Classify a fetch error
    pub fn from_error(error: FetchError, attempts: u32) -> Self {
        match error {
            FetchError::NotFound { .. } => FetchOutcome::NotFound {
                error: error.to_string(),
                attempts,
            },
            _ => FetchOutcome::Failed {
                kind: if error.is_permanent() {
                    FailureKind::Permanent
                } else {
                    FailureKind::Transient
                },
                disk: error.is_disk_failure(),
                error: error.to_string(),
                attempts,
            },
        }
    }

    /// HTTP requests made for this outcome
    pub fn attempts(&self) -> u32 {
        match self {
            FetchOutcome::Downloaded { attempts, .. }
            | FetchOutcome::NotFound { attempts, .. }
            | FetchOutcome::Failed { attempts, .. } => *attempts,
        }
    }
}

/// Abstraction over artifact retrieval, enabling testability.
#[async_trait::async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Fetch one record into the cache
    ///
    /// Must not panic and must not touch the index. Every failure is
    /// reported through the returned outcome.
    async fn fetch(&self, record: &Record) -> FetchOutcome;
}

/// Production [`ArtifactFetcher`] that downloads over HTTP
pub struct FetchWorker {
    client: reqwest::Client,
    layout: CacheLayout,
    url_template: String,
    retry: RetryConfig,
}

impl FetchWorker {
    /// Build a worker from the download, retry and cache settings
    pub fn new(config: &Config) -> Result<Self> {
        let cache_dir = config.require_cache_dir()?;
        let client = reqwest::Client::builder()
            .timeout(config.download.request_timeout)
            .user_agent(config.download.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            layout: CacheLayout::new(cache_dir),
            url_template: config.download.url_template.clone(),
            retry: config.retry.clone(),
        })
    }

    /// Remote URL of a record
    pub fn url_for(&self, record: &Record) -> String {
        self.url_template
            .replace("{release_mbid}", &record.release_mbid)
            .replace("{caa_id}", &record.id.to_string())
            .replace("{ext}", &cache::extension(record.mime_type.as_deref()))
    }

    /// Cache layout used for final paths
    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    /// One GET request; only a 200 with a non-empty body is accepted
    async fn fetch_body(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound {
                url: url.to_string(),
            });
        }
        // A 206 or 204 is not a complete artifact
        if status != reqwest::StatusCode::OK {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;
        if body.is_empty() {
            return Err(FetchError::EmptyBody {
                url: url.to_string(),
            });
        }

        Ok(body.to_vec())
    }
}

#[async_trait::async_trait]
impl ArtifactFetcher for FetchWorker {
    async fn fetch(&self, record: &Record) -> FetchOutcome {
        let path = match self.layout.path_for(record) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(caa_id = record.id.get(), error = %e, "Skipping record with invalid metadata");
                return FetchOutcome::from_error(e, 0);
            }
        };
        let url = self.url_for(record);

        let attempts = AtomicU32::new(0);
        let body = download_with_retry(&self.retry, || {
            attempts.fetch_add(1, Ordering::Relaxed);
            self.fetch_body(&url)
        })
        .await;
        let attempts = attempts.load(Ordering::Relaxed);

        let body = match body {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(caa_id = record.id.get(), attempts, error = %e, "Fetch failed");
                return FetchOutcome::from_error(e, attempts);
            }
        };

        match cache::write_atomic(&path, &body).await {
            Ok(bytes) => {
                tracing::debug!(caa_id = record.id.get(), bytes, path = %path.display(), "Artifact written");
                FetchOutcome::Downloaded {
                    path,
                    bytes,
                    attempts,
                }
            }
            Err(source) => {
                tracing::warn!(caa_id = record.id.get(), path = %path.display(), error = %source, "Cache write failed");
                FetchOutcome::from_error(FetchError::Write { path, source }, attempts)
            }
        }
    }
}
