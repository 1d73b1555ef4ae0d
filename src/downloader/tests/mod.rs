
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::config::{Config, RetryConfig};
use crate::db::Database;
use crate::downloader::{ArtifactFetcher, FetchOutcome};
use crate::types::{CaaId, FailureKind, NewRecord, Record, Status};

pub(super) const MBID: &str = "76df3287-6cda-33eb-8e9a-044b5e15ffdd";

/// Retry policy with short, deterministic delays
pub(super) fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

/// Config pointing at a mock server and a temporary cache
pub(super) fn test_config(cache_dir: &Path, base_url: &str) -> Config {
    let mut config = Config::default();
    config.cache_dir = Some(cache_dir.to_path_buf());
    config.download.url_template = format!(
        "{}/download/mbid-{{release_mbid}}/mbid-{{release_mbid}}-{{caa_id}}.jpg",
        base_url
    );
    config.download.request_timeout = Duration::from_millis(200);
    config.download.pending_poll_interval = Duration::from_millis(10);
    config.retry = fast_retry();
    config
}

/// URL path the default template produces for `id`
pub(super) fn artifact_path(id: i64) -> String {
    format!("/download/mbid-{}/mbid-{}-{}.jpg", MBID, MBID, id)
}

/// Expected cache location of a JPEG record
pub(super) fn cached_file(cache_dir: &Path, id: i64) -> PathBuf {
    cache_dir
        .join("7")
        .join("6")
        .join(format!("{}-{}.jpg", MBID, id))
}

pub(super) fn pending_record(id: i64) -> Record {
    Record {
        id: CaaId(id),
        release_mbid: MBID.to_string(),
        mime_type: Some("image/jpeg".to_string()),
        status: Status::Pending,
        failure: None,
        error_message: None,
        attempts: 0,
        seq: id,
    }
}

/// Open a fresh index holding records `1..=count`
pub(super) async fn seeded_db(dir: &Path, count: i64) -> Arc<Database> {
    let db = Database::new(&dir.join("index.db")).await.unwrap();
    let records: Vec<NewRecord> = (1..=count)
        .map(|id| NewRecord::new(id, MBID, Some("image/jpeg")))
        .collect();
    db.upsert_records(&records).await.unwrap();
    Arc::new(db)
}

pub(super) async fn status_of(db: &Database, id: i64) -> Status {
    db.get_record(CaaId(id)).await.unwrap().unwrap().status
}

/// Scripted [`ArtifactFetcher`] that records calls and peak concurrency
pub(super) struct FakeFetcher {
    delay: Duration,
    script: HashMap<i64, FetchOutcome>,
    calls: std::sync::Mutex<Vec<CaaId>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FakeFetcher {
    /// Every record downloads after `delay`
    pub(super) fn new(delay: Duration) -> Self {
        Self {
            delay,
            script: HashMap::new(),
            calls: std::sync::Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    /// Return `outcome` for record `id`
    pub(super) fn with_outcome(mut self, id: i64, outcome: FetchOutcome) -> Self {
        self.script.insert(id, outcome);
        self
    }

    pub(super) fn calls(&self) -> Vec<CaaId> {
        self.calls.lock().unwrap().clone()
    }

    pub(super) fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

pub(super) fn not_found() -> FetchOutcome {
    FetchOutcome::NotFound {
        error: "artifact not found upstream".to_string(),
        attempts: 1,
    }
}

pub(super) fn transient() -> FetchOutcome {
    FetchOutcome::Failed {
        kind: FailureKind::Transient,
        error: "request timed out".to_string(),
        attempts: 3,
        disk: false,
    }
}

pub(super) fn disk_full() -> FetchOutcome {
    FetchOutcome::Failed {
        kind: FailureKind::Transient,
        error: "No space left on device".to_string(),
        attempts: 1,
        disk: true,
    }
}

#[async_trait::async_trait]
impl ArtifactFetcher for FakeFetcher {
    async fn fetch(&self, record: &Record) -> FetchOutcome {
        self.calls.lock().unwrap().push(record.id);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        self.script
            .get(&record.id.get())
            .cloned()
            .unwrap_or_else(|| FetchOutcome::Downloaded {
                path: PathBuf::from(format!("/cache/{}.jpg", record.id)),
                bytes: 10,
                attempts: 1,
            })
    }
}
