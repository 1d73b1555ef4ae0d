//! Enumeration run history.

use crate::error::DatabaseError;
use crate::{Error, Result};

use super::{Database, ImportRun, UpsertStats};

impl Database {
    /// Record the start of an import and return its id
    pub async fn begin_import(&self, incremental: bool) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query("INSERT INTO import_runs (started_at, incremental) VALUES (?, ?)")
            .bind(now)
            .bind(incremental)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to record import start: {}",
                    e
                )))
            })?;

        Ok(result.last_insert_rowid())
    }

    /// Record the end of an import with its totals
    pub async fn finish_import(&self, id: i64, fetched: u64, stats: UpsertStats) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "UPDATE import_runs SET finished_at = ?, fetched = ?, inserted = ?, updated = ? WHERE id = ?",
        )
        .bind(now)
        .bind(fetched as i64)
        .bind(stats.inserted as i64)
        .bind(stats.updated as i64)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to record import finish: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Most recent import that ran to completion
    pub async fn last_import(&self) -> Result<Option<ImportRun>> {
        let row = sqlx::query_as::<_, ImportRun>(
            r#"
            SELECT id, started_at, finished_at, incremental, fetched, inserted, updated
            FROM import_runs
            WHERE finished_at IS NOT NULL
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get last import: {}",
                e
            )))
        })?;

        Ok(row)
    }
}
