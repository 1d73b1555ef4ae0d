//! Record upsert, pending reads and status transitions.

use crate::error::DatabaseError;
use crate::types::{CaaId, FailureKind, NewRecord, Record, RequeueScope, Status, StatusCounts};
use crate::{Error, Result};

use super::{Database, RecordRow, UpsertStats};

const RECORD_COLUMNS: &str = "seq, caa_id, release_mbid, mime_type, status, failure_kind, error_message, attempts";

impl Database {
    /// Insert new records as PENDING and refresh metadata of existing ones
    ///
    /// Existing records keep their status, so re-running an import never
    /// regresses a DOWNLOADED or FAILED record. The whole batch commits as one
    /// transaction.
    pub async fn upsert_records(&self, batch: &[NewRecord]) -> Result<UpsertStats> {
        let mut stats = UpsertStats::default();
        if batch.is_empty() {
            return Ok(stats);
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin upsert transaction: {}",
                e
            )))
        })?;

        for record in batch {
            let inserted = sqlx::query(
                r#"
                INSERT INTO records (caa_id, release_mbid, mime_type, status, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(caa_id) DO NOTHING
                "#,
            )
            .bind(record.id)
            .bind(&record.release_mbid)
            .bind(&record.mime_type)
            .bind(Status::Pending.to_i32())
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to insert record {}: {}",
                    record.id, e
                )))
            })?
            .rows_affected();

            if inserted > 0 {
                stats.inserted += 1;
                continue;
            }

            let updated = sqlx::query(
                r#"
                UPDATE records
                SET release_mbid = ?, mime_type = ?, updated_at = ?
                WHERE caa_id = ? AND (release_mbid != ? OR mime_type IS NOT ?)
                "#,
            )
            .bind(&record.release_mbid)
            .bind(&record.mime_type)
            .bind(now)
            .bind(record.id)
            .bind(&record.release_mbid)
            .bind(&record.mime_type)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update record {}: {}",
                    record.id, e
                )))
            })?
            .rows_affected();

            stats.updated += updated;
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit upsert: {}",
                e
            )))
        })?;

        Ok(stats)
    }

    /// Up to `limit` PENDING records in insertion order
    pub async fn fetch_pending(&self, limit: usize) -> Result<Vec<Record>> {
        let rows = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {} FROM records WHERE status = ? ORDER BY seq ASC LIMIT ?",
            RECORD_COLUMNS
        ))
        .bind(Status::Pending.to_i32())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to fetch pending records: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(Record::from).collect())
    }

    /// Get a record by ID
    pub async fn get_record(&self, id: CaaId) -> Result<Option<Record>> {
        let row = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {} FROM records WHERE caa_id = ?",
            RECORD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get record: {}",
                e
            )))
        })?;

        Ok(row.map(Record::from))
    }

    /// PENDING → DOWNLOADED
    pub async fn mark_downloaded(&self, id: CaaId, attempts: u32) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE records
            SET status = ?, failure_kind = NULL, error_message = NULL,
                attempts = ?, updated_at = ?, downloaded_at = ?
            WHERE caa_id = ? AND status = ?
            "#,
        )
        .bind(Status::Downloaded.to_i32())
        .bind(attempts as i64)
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(Status::Pending.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark record {} downloaded: {}",
                id, e
            )))
        })?;

        if result.rows_affected() == 0 {
            return Err(self.rejected_transition(id, "downloaded").await);
        }
        Ok(())
    }

    /// PENDING → FAILED, keeping the failure kind and message
    pub async fn mark_failed(
        &self,
        id: CaaId,
        kind: FailureKind,
        error: &str,
        attempts: u32,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE records
            SET status = ?, failure_kind = ?, error_message = ?, attempts = ?, updated_at = ?
            WHERE caa_id = ? AND status = ?
            "#,
        )
        .bind(Status::Failed.to_i32())
        .bind(kind.to_i32())
        .bind(error)
        .bind(attempts as i64)
        .bind(now)
        .bind(id)
        .bind(Status::Pending.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark record {} failed: {}",
                id, e
            )))
        })?;

        if result.rows_affected() == 0 {
            return Err(self.rejected_transition(id, "failed").await);
        }
        Ok(())
    }

    /// Distinguish a missing record from one that is no longer pending
    async fn rejected_transition(&self, id: CaaId, target: &'static str) -> Error {
        match self.get_record(id).await {
            Ok(Some(_)) => Error::Database(DatabaseError::InvalidTransition { id, target }),
            Ok(None) => Error::Database(DatabaseError::NotFound(id)),
            Err(e) => e,
        }
    }

    /// FAILED → PENDING for the given scope; returns the number of records re-queued
    pub async fn requeue_failed(&self, scope: RequeueScope) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let query = match scope {
            RequeueScope::Transient => sqlx::query(
                r#"
                UPDATE records
                SET status = ?, failure_kind = NULL, error_message = NULL, updated_at = ?
                WHERE status = ? AND (failure_kind IS NULL OR failure_kind = ?)
                "#,
            )
            .bind(Status::Pending.to_i32())
            .bind(now)
            .bind(Status::Failed.to_i32())
            .bind(FailureKind::Transient.to_i32()),
            RequeueScope::All => sqlx::query(
                r#"
                UPDATE records
                SET status = ?, failure_kind = NULL, error_message = NULL, updated_at = ?
                WHERE status = ?
                "#,
            )
            .bind(Status::Pending.to_i32())
            .bind(now)
            .bind(Status::Failed.to_i32()),
        };

        let result = query.execute(&self.pool).await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to requeue failed records: {}",
                e
            )))
        })?;

        Ok(result.rows_affected())
    }

    /// DOWNLOADED records with `seq` greater than `after_seq`, in insertion order
    ///
    /// Used for keyset pagination by the cache verifier.
    pub async fn downloaded_after(&self, after_seq: i64, limit: usize) -> Result<Vec<Record>> {
        let rows = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {} FROM records WHERE status = ? AND seq > ? ORDER BY seq ASC LIMIT ?",
            RECORD_COLUMNS
        ))
        .bind(Status::Downloaded.to_i32())
        .bind(after_seq)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list downloaded records: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(Record::from).collect())
    }

    /// DOWNLOADED → PENDING for a record whose cache file went missing
    pub async fn reset_to_pending(&self, id: CaaId, reason: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            UPDATE records
            SET status = ?, failure_kind = NULL, error_message = ?, downloaded_at = NULL, updated_at = ?
            WHERE caa_id = ? AND status = ?
            "#,
        )
        .bind(Status::Pending.to_i32())
        .bind(reason)
        .bind(now)
        .bind(id)
        .bind(Status::Downloaded.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to reset record {}: {}",
                id, e
            )))
        })?;

        Ok(())
    }

    /// Number of PENDING records
    pub async fn pending_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE status = ?")
            .bind(Status::Pending.to_i32())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count pending records: {}",
                    e
                )))
            })?;

        Ok(count as u64)
    }

    /// Record counts per status and failure kind
    pub async fn status_counts(&self) -> Result<StatusCounts> {
        let rows: Vec<(i32, Option<i32>, i64)> = sqlx::query_as(
            "SELECT status, failure_kind, COUNT(*) FROM records GROUP BY status, failure_kind",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to count records: {}",
                e
            )))
        })?;

        let mut counts = StatusCounts::default();
        for (status, kind, count) in rows {
            let count = count as u64;
            match (Status::from_i32(status), kind.and_then(FailureKind::from_i32)) {
                (Status::Pending, _) => counts.pending += count,
                (Status::Downloaded, _) => counts.downloaded += count,
                (Status::Failed, Some(FailureKind::Permanent)) => counts.failed_permanent += count,
                (Status::Failed, _) => counts.failed_transient += count,
            }
        }

        Ok(counts)
    }
}
