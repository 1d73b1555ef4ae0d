//! Download coordinator: bounded worker pool over the pending records.
//!
//! The coordinator is the only writer of record status during a run. Workers
//! return a [`FetchOutcome`] and the coordinator turns it into exactly one
//! index transition. In-flight records stay PENDING in the index, so a crash
//! at any point leaves them to be fetched again by the next run.

use std::collections::{HashMap, HashSet, VecDeque};

use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;

use super::{Downloader, FetchOutcome};
use crate::config::FailedRecordPolicy;
use crate::error::{Error, Result};
use crate::types::{CaaId, Event, FailureKind, Record, RequeueScope, RunSummary, StatusCounts};

/// Consecutive cache write failures seen by the coordinator
struct DiskFailures {
    consecutive: u32,
    limit: u32,
    last_error: String,
}

impl DiskFailures {
    fn new(limit: u32) -> Self {
        Self {
            consecutive: 0,
            limit,
            last_error: String::new(),
        }
    }

    fn record(&mut self, error: &str) {
        self.consecutive += 1;
        self.last_error = error.to_string();
    }

    fn reset(&mut self) {
        self.consecutive = 0;
    }

    fn exceeded(&self) -> Option<Error> {
        if self.limit > 0 && self.consecutive >= self.limit {
            Some(Error::DiskFailures {
                count: self.consecutive,
                last_error: self.last_error.clone(),
            })
        } else {
            None
        }
    }
}

impl Downloader {
    /// Download every PENDING record until none remain
    ///
    /// At most `download.workers` records are in flight at once, and no
    /// record is dispatched twice within one run. The run ends when the index
    /// has no pending record left that was not already processed, or when
    /// `cancel` fires; in both cases in-flight workers finish and their
    /// outcomes are recorded before this returns.
    ///
    /// Per-record failures are recorded in the index and counted in the
    /// summary. A worker that panics leaves its record PENDING and is counted
    /// as abandoned. Errors are returned only for conditions that stop the
    /// whole run: an index write failure (including the re-queue done by
    /// `download.failed_policy` at start), `download.max_read_failures`
    /// consecutive index read failures, or too many consecutive cache write
    /// failures.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunSummary> {
        let download = &self.config.download;
        let workers = download.workers.max(1);

        self.apply_failed_policy().await?;

        let counts = self.initial_counts(&cancel).await?;
        let mut summary = RunSummary {
            skipped: counts.downloaded,
            ..RunSummary::default()
        };

        self.stats.begin(counts.pending, workers);
        self.emit_event(Event::RunStarted {
            pending: counts.pending,
            workers,
        });
        tracing::info!(
            pending = counts.pending,
            already_downloaded = counts.downloaded,
            workers,
            "Download run started"
        );

        let mut buffer: VecDeque<Record> = VecDeque::new();
        let mut in_flight: HashSet<CaaId> = HashSet::new();
        let mut tasks: JoinSet<(Record, FetchOutcome)> = JoinSet::new();
        let mut task_records: HashMap<task::Id, CaaId> = HashMap::new();
        let mut exhausted = false;
        let mut read_failures = 0u32;
        let mut disk = DiskFailures::new(download.max_consecutive_disk_failures);
        let mut abort: Option<Error> = None;

        loop {
            let dispatching = abort.is_none() && !cancel.is_cancelled();

            if dispatching && buffer.is_empty() && !exhausted {
                // Over-fetch by the in-flight count so those records can be skipped
                match self.db.fetch_pending(download.batch_size + in_flight.len()).await {
                    Ok(records) => {
                        read_failures = 0;
                        buffer.extend(records.into_iter().filter(|r| !in_flight.contains(&r.id)));
                        if buffer.is_empty() {
                            exhausted = true;
                        }
                    }
                    Err(e) => {
                        read_failures += 1;
                        tracing::warn!(
                            error = %e,
                            consecutive = read_failures,
                            "Failed to read pending records"
                        );
                        if read_failures >= download.max_read_failures {
                            abort = Some(e);
                            continue;
                        }
                        if tasks.is_empty() {
                            tokio::select! {
                                _ = tokio::time::sleep(download.pending_poll_interval) => {}
                                _ = cancel.cancelled() => {}
                            }
                            continue;
                        }
                    }
                }
            }

            while dispatching && tasks.len() < workers {
                let Some(record) = buffer.pop_front() else {
                    break;
                };
                in_flight.insert(record.id);
                self.stats.dispatched();

                let id = record.id;
                let fetcher = self.fetcher.clone();
                let handle = tasks.spawn(async move {
                    let outcome = fetcher.fetch(&record).await;
                    (record, outcome)
                });
                task_records.insert(handle.id(), id);
            }

            if tasks.is_empty() {
                if !dispatching || (exhausted && buffer.is_empty()) {
                    break;
                }
                continue;
            }

            let Some(joined) = tasks.join_next_with_id().await else {
                continue;
            };
            self.stats.completed();

            let (record, outcome) = match joined {
                Ok((task_id, result)) => {
                    task_records.remove(&task_id);
                    result
                }
                Err(e) => {
                    // The record stays PENDING and in `in_flight`, so it is
                    // not dispatched again until the next run
                    let caa_id = task_records.remove(&e.id());
                    summary.abandoned += 1;
                    tracing::error!(
                        caa_id = caa_id.map(|id| id.get()),
                        error = %e,
                        "Fetch worker panicked, record left pending"
                    );
                    continue;
                }
            };
            in_flight.remove(&record.id);

            if let Err(e) = self
                .record_outcome(&record, outcome, &mut summary, &mut disk)
                .await
            {
                tracing::error!(caa_id = record.id.get(), error = %e, "Failed to record outcome");
                abort.get_or_insert(e);
            }
            if abort.is_none() {
                abort = disk.exceeded();
                if abort.is_some() {
                    tracing::error!(
                        consecutive = disk.consecutive,
                        last_error = %disk.last_error,
                        "Too many consecutive cache write failures, stopping dispatch"
                    );
                }
            }
        }

        self.stats.finish();

        if let Some(e) = abort {
            tracing::error!(
                error = %e,
                downloaded = summary.downloaded,
                failed = summary.failed(),
                "Download run aborted"
            );
            return Err(e);
        }

        summary.interrupted = !(exhausted && buffer.is_empty());
        self.emit_event(Event::Drained { summary });
        tracing::info!(
            downloaded = summary.downloaded,
            failed_permanent = summary.failed_permanent,
            failed_transient = summary.failed_transient,
            skipped = summary.skipped,
            abandoned = summary.abandoned,
            interrupted = summary.interrupted,
            "Download run finished"
        );

        Ok(summary)
    }

    /// Index counts at run start
    ///
    /// A failed read is retried after `download.pending_poll_interval`, up to
    /// `download.max_read_failures` consecutive failures.
    async fn initial_counts(&self, cancel: &CancellationToken) -> Result<StatusCounts> {
        let download = &self.config.download;
        let mut failures = 0u32;

        loop {
            match self.db.status_counts().await {
                Ok(counts) => return Ok(counts),
                Err(e) => {
                    failures += 1;
                    tracing::warn!(
                        error = %e,
                        consecutive = failures,
                        "Failed to read index counts"
                    );
                    if failures >= download.max_read_failures || cancel.is_cancelled() {
                        return Err(e);
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(download.pending_poll_interval) => {}
                        _ = cancel.cancelled() => {}
                    }
                }
            }
        }
    }

    /// Re-queue FAILED records according to `download.failed_policy`
    async fn apply_failed_policy(&self) -> Result<()> {
        let scope = match self.config.download.failed_policy {
            FailedRecordPolicy::Manual => return Ok(()),
            FailedRecordPolicy::RetryTransient => RequeueScope::Transient,
            FailedRecordPolicy::RetryAll => RequeueScope::All,
        };

        let requeued = self.db.requeue_failed(scope).await?;
        if requeued > 0 {
            tracing::info!(requeued, scope = ?scope, "Re-queued failed records");
        }
        Ok(())
    }

    /// Perform the single index transition for one outcome
    async fn record_outcome(
        &self,
        record: &Record,
        outcome: FetchOutcome,
        summary: &mut RunSummary,
        disk: &mut DiskFailures,
    ) -> Result<()> {
        match outcome {
            FetchOutcome::Downloaded {
                path,
                bytes,
                attempts,
            } => {
                self.db.mark_downloaded(record.id, attempts).await?;
                disk.reset();
                summary.downloaded += 1;
                self.stats.record_download(bytes);
                self.emit_event(Event::Downloaded {
                    id: record.id,
                    path,
                    bytes,
                });
            }
            FetchOutcome::NotFound { error, attempts } => {
                self.record_failure(record, FailureKind::Permanent, error, attempts, summary)
                    .await?;
            }
            FetchOutcome::Failed {
                kind,
                error,
                attempts,
                disk: disk_failure,
            } => {
                if disk_failure {
                    disk.record(&error);
                } else {
                    disk.reset();
                }
                self.record_failure(record, kind, error, attempts, summary)
                    .await?;
            }
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        record: &Record,
        kind: FailureKind,
        error: String,
        attempts: u32,
        summary: &mut RunSummary,
    ) -> Result<()> {
        self.db.mark_failed(record.id, kind, &error, attempts).await?;
        match kind {
            FailureKind::Permanent => summary.failed_permanent += 1,
            FailureKind::Transient => summary.failed_transient += 1,
        }
        self.stats.record_failure(kind);
        tracing::warn!(
            caa_id = record.id.get(),
            release_mbid = %record.release_mbid,
            kind = ?kind,
            attempts,
            error = %error,
            "Record failed"
        );
        self.emit_event(Event::Failed {
            id: record.id,
            kind,
            error,
        });
        Ok(())
    }
}
