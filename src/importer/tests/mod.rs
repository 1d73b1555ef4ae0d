use std::sync::Arc;

use super::*;
use crate::Error;
use crate::types::{CaaId, FailureKind, Status};

const MBID: &str = "76df3287-6cda-33eb-8e9a-044b5e15ffdd";
const OTHER_MBID: &str = "1e477f68-c407-4eae-ad01-518528cedc2c";

fn records(ids: std::ops::RangeInclusive<i64>) -> Vec<NewRecord> {
    ids.map(|id| NewRecord::new(id, MBID, Some("image/jpeg")))
        .collect()
}

async fn test_db() -> (Arc<Database>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(&dir.path().join("index.db")).await.unwrap();
    (Arc::new(db), dir)
}

/// Yields `ok_batches` batches, then fails
struct FlakySource {
    inner: MemorySource,
    ok_batches: usize,
}

#[async_trait::async_trait]
impl RecordSource for FlakySource {
    async fn total(&mut self) -> Result<Option<u64>> {
        Ok(None)
    }

    async fn next_batch(&mut self, limit: usize) -> Result<Vec<NewRecord>> {
        if self.ok_batches == 0 {
            return Err(Error::Source("connection reset by peer".to_string()));
        }
        self.ok_batches -= 1;
        self.inner.next_batch(limit).await
    }
}

#[tokio::test]
async fn test_memory_source_batches() {
    let mut source = MemorySource::new(records(1..=5));
    assert_eq!(source.total().await.unwrap(), Some(5));

    assert_eq!(source.next_batch(2).await.unwrap().len(), 2);
    assert_eq!(source.next_batch(2).await.unwrap().len(), 2);
    assert_eq!(source.next_batch(2).await.unwrap().len(), 1);
    assert!(source.next_batch(2).await.unwrap().is_empty());
    assert_eq!(source.remaining(), 0);
}

#[tokio::test]
async fn test_import_loads_all_batches() {
    let (db, _dir) = test_db().await;
    let importer = Importer::new(db.clone(), 3);
    let mut source = MemorySource::new(records(1..=10));

    let mut progress = Vec::new();
    let summary = importer
        .run(&mut source, false, |s| progress.push(s.fetched))
        .await
        .unwrap();

    assert_eq!(
        summary,
        ImportSummary {
            fetched: 10,
            inserted: 10,
            updated: 0,
        }
    );
    assert_eq!(progress, vec![3, 6, 9, 10]);
    assert_eq!(db.pending_count().await.unwrap(), 10);

    let run = db.last_import().await.unwrap().unwrap();
    assert_eq!(run.fetched, 10);
    assert_eq!(run.inserted, 10);
    assert!(!run.incremental);
}

#[tokio::test]
async fn test_reimport_is_idempotent_and_keeps_status() {
    let (db, _dir) = test_db().await;
    let importer = Importer::new(db.clone(), 4);

    importer
        .run(&mut MemorySource::new(records(1..=6)), false, |_| {})
        .await
        .unwrap();
    db.mark_downloaded(CaaId(1), 1).await.unwrap();
    db.mark_failed(CaaId(2), FailureKind::Permanent, "404", 1)
        .await
        .unwrap();

    let summary = importer
        .run(&mut MemorySource::new(records(1..=6)), false, |_| {})
        .await
        .unwrap();

    assert_eq!(summary.fetched, 6);
    assert_eq!(summary.inserted, 0);
    assert_eq!(summary.updated, 0);

    let counts = db.status_counts().await.unwrap();
    assert_eq!(counts.total(), 6);
    assert_eq!(counts.downloaded, 1);
    assert_eq!(counts.failed_permanent, 1);
    assert_eq!(counts.pending, 4);
}

#[tokio::test]
async fn test_metadata_changes_are_counted() {
    let (db, _dir) = test_db().await;
    let importer = Importer::new(db.clone(), 10);

    importer
        .run(&mut MemorySource::new(records(1..=3)), false, |_| {})
        .await
        .unwrap();

    let changed = vec![
        NewRecord::new(1, OTHER_MBID, Some("image/jpeg")),
        NewRecord::new(2, MBID, Some("image/png")),
        NewRecord::new(3, MBID, Some("image/jpeg")),
        NewRecord::new(4, MBID, None),
    ];
    let summary = importer
        .run(&mut MemorySource::new(changed), true, |_| {})
        .await
        .unwrap();

    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.updated, 2);
    let record = db.get_record(CaaId(1)).await.unwrap().unwrap();
    assert_eq!(record.release_mbid, OTHER_MBID);
    assert_eq!(record.status, Status::Pending);
}

#[tokio::test]
async fn test_source_failure_keeps_committed_batches() {
    let (db, _dir) = test_db().await;
    let importer = Importer::new(db.clone(), 2);
    let mut source = FlakySource {
        inner: MemorySource::new(records(1..=6)),
        ok_batches: 2,
    };

    let result = importer.run(&mut source, false, |_| {}).await;

    assert!(matches!(result, Err(Error::Source(_))));
    assert_eq!(db.pending_count().await.unwrap(), 4);
    assert!(
        db.last_import().await.unwrap().is_none(),
        "a failed import must not move the watermark"
    );

    // Running again picks up where the source left off
    let summary = importer
        .run(&mut MemorySource::new(records(1..=6)), false, |_| {})
        .await
        .unwrap();
    assert_eq!(summary.inserted, 2);
    assert_eq!(db.pending_count().await.unwrap(), 6);
}

#[tokio::test]
async fn test_watermark_follows_last_finished_import() {
    let (db, _dir) = test_db().await;
    let importer = Importer::new(db.clone(), 10);

    assert!(importer.watermark().await.unwrap().is_none());

    let before = chrono::Utc::now().timestamp();
    importer
        .run(&mut MemorySource::new(records(1..=2)), false, |_| {})
        .await
        .unwrap();

    let watermark = importer.watermark().await.unwrap().unwrap();
    assert!(watermark.timestamp() >= before);
    assert!(watermark.timestamp() <= chrono::Utc::now().timestamp());
}

#[tokio::test]
async fn test_empty_source_still_records_import() {
    let (db, _dir) = test_db().await;
    let importer = Importer::new(db.clone(), 10);

    let summary = importer
        .run(&mut MemorySource::default(), true, |_| {})
        .await
        .unwrap();

    assert_eq!(summary, ImportSummary::default());
    let run = db.last_import().await.unwrap().unwrap();
    assert!(run.incremental);
    assert_eq!(run.fetched, 0);
}
