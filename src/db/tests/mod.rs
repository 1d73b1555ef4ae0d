
use crate::types::NewRecord;

/// Release MBID used by most fixtures
pub(super) const MBID: &str = "76df3287-6cda-33eb-8e9a-044b5e15ffdd";

/// `count` records with ids starting at `first_id`
pub(super) fn sample_records(first_id: i64, count: i64) -> Vec<NewRecord> {
    (first_id..first_id + count)
        .map(|id| NewRecord::new(id, MBID, Some("image/jpeg")))
        .collect()
}
