//! MusicBrainz PostgreSQL source.

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use super::RecordSource;
use crate::error::{Error, Result};
use crate::types::NewRecord;

/// Cover art joined with the release it belongs to
///
/// `$1` is the keyset cursor, `$2` an optional upload-time lower bound in
/// unix seconds, `$3` the page size.
const PAGE_QUERY: &str = r#"
    SELECT caa.id, r.gid::text, caa.mime_type
    FROM cover_art_archive.cover_art caa
    JOIN musicbrainz.release r ON caa.release = r.id
    WHERE caa.id > $1
      AND ($2::bigint IS NULL OR caa.date_uploaded > to_timestamp($2))
    ORDER BY caa.id
    LIMIT $3
"#;

const COUNT_QUERY: &str = r#"
    SELECT count(*)
    FROM cover_art_archive.cover_art caa
    JOIN musicbrainz.release r ON caa.release = r.id
    WHERE ($1::bigint IS NULL OR caa.date_uploaded > to_timestamp($1))
"#;

/// [`RecordSource`] reading the Cover Art Archive tables of a MusicBrainz
/// database
///
/// Pages by cover art id (keyset pagination), so each batch is an
/// independent query and no server-side cursor stays open for the length of
/// the import.
pub struct PostgresSource {
    pool: PgPool,
    since: Option<i64>,
    last_id: i64,
}

impl PostgresSource {
    /// Connect to the source database
    ///
    /// With `since`, only artifacts uploaded after that instant are yielded.
    pub async fn connect(url: &str, since: Option<DateTime<Utc>>) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .connect(url)
            .await
            .map_err(|e| Error::Source(format!("failed to connect to source database: {}", e)))?;

        tracing::info!(incremental = since.is_some(), "Connected to source database");

        Ok(Self::from_pool(pool, since))
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool, since: Option<DateTime<Utc>>) -> Self {
        Self {
            pool,
            since: since.map(|t| t.timestamp()),
            last_id: 0,
        }
    }
}

#[async_trait::async_trait]
impl RecordSource for PostgresSource {
    async fn total(&mut self) -> Result<Option<u64>> {
        let count: i64 = sqlx::query_scalar(COUNT_QUERY)
            .bind(self.since)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::Source(format!("failed to count source records: {}", e)))?;

        Ok(Some(count.max(0) as u64))
    }

    async fn next_batch(&mut self, limit: usize) -> Result<Vec<NewRecord>> {
        let rows: Vec<(i64, String, Option<String>)> = sqlx::query_as(PAGE_QUERY)
            .bind(self.last_id)
            .bind(self.since)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Source(format!(
                    "failed to read source records after id {}: {}",
                    self.last_id, e
                ))
            })?;

        if let Some((id, _, _)) = rows.last() {
            self.last_id = *id;
        }

        Ok(rows
            .into_iter()
            .map(|(id, mbid, mime_type)| NewRecord::new(id, mbid, mime_type.as_deref()))
            .collect())
    }
}
