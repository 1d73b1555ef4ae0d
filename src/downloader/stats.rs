//! Live counters for the current download run.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};

use crate::types::FailureKind;

/// Shared, lock-free progress counters
///
/// Updated by the coordinator as outcomes arrive and read by the monitor
/// endpoint and the CLI. They are observational only; the index stays the
/// source of truth.
#[derive(Debug, Default)]
pub struct RunStats {
    running: AtomicBool,
    started_at: AtomicI64,
    workers: AtomicUsize,
    pending_at_start: AtomicU64,
    in_flight: AtomicUsize,
    downloaded: AtomicU64,
    bytes: AtomicU64,
    failed_permanent: AtomicU64,
    failed_transient: AtomicU64,
}

/// Point-in-time copy of [`RunStats`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// A run is currently in progress
    pub running: bool,
    /// Unix timestamp of the run start (0 before the first run)
    pub started_at: i64,
    /// Worker pool size
    pub workers: usize,
    /// PENDING records when the run started
    pub pending_at_start: u64,
    /// Records currently being fetched
    pub in_flight: usize,
    /// Records downloaded so far in this run
    pub downloaded: u64,
    /// Bytes written to the cache in this run
    pub bytes: u64,
    /// Permanent failures in this run
    pub failed_permanent: u64,
    /// Transient failures in this run
    pub failed_transient: u64,
}

impl StatsSnapshot {
    /// Records finished in this run, successfully or not
    pub fn processed(&self) -> u64 {
        self.downloaded + self.failed_permanent + self.failed_transient
    }
}

impl RunStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the counters for a new run
    pub(crate) fn begin(&self, pending: u64, workers: usize) {
        self.started_at
            .store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
        self.workers.store(workers, Ordering::Relaxed);
        self.pending_at_start.store(pending, Ordering::Relaxed);
        self.in_flight.store(0, Ordering::Relaxed);
        self.downloaded.store(0, Ordering::Relaxed);
        self.bytes.store(0, Ordering::Relaxed);
        self.failed_permanent.store(0, Ordering::Relaxed);
        self.failed_transient.store(0, Ordering::Relaxed);
        self.running.store(true, Ordering::Release);
    }

    pub(crate) fn dispatched(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn completed(&self) {
        // Saturating: a panicked worker is never counted back in
        let _ = self
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub(crate) fn record_download(&self, bytes: u64) {
        self.downloaded.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self, kind: FailureKind) {
        match kind {
            FailureKind::Permanent => self.failed_permanent.fetch_add(1, Ordering::Relaxed),
            FailureKind::Transient => self.failed_transient.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub(crate) fn finish(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Current values
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            running: self.running.load(Ordering::Acquire),
            started_at: self.started_at.load(Ordering::Relaxed),
            workers: self.workers.load(Ordering::Relaxed),
            pending_at_start: self.pending_at_start.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            downloaded: self.downloaded.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            failed_permanent: self.failed_permanent.load(Ordering::Relaxed),
            failed_transient: self.failed_transient.load(Ordering::Relaxed),
        }
    }
}
