//! Cache verification driven by the index.
//!
//! Walks every DOWNLOADED record and checks that its cache file exists and is
//! non-empty. Records whose file is gone are put back to PENDING so the next
//! download run fetches them again. The cache directory is never scanned; a
//! stray file without a DOWNLOADED record is simply ignored.

use serde::Serialize;
use std::sync::Arc;

use crate::cache::CacheLayout;
use crate::db::Database;
use crate::error::Result;
use crate::types::Record;

/// Records read from the index per page
const DEFAULT_PAGE_SIZE: usize = 1000;

/// Totals of one verification pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct VerifySummary {
    /// DOWNLOADED records examined
    pub checked: u64,
    /// Records reset to PENDING because their file was missing or empty
    pub missing: u64,
}

/// Reconciles DOWNLOADED records with the cache
pub struct Verifier {
    db: Arc<Database>,
    layout: CacheLayout,
    page_size: usize,
}

impl Verifier {
    /// Create a verifier for the cache rooted at `layout`
    pub fn new(db: Arc<Database>, layout: CacheLayout) -> Self {
        Self {
            db,
            layout,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Override the index page size
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Check every DOWNLOADED record
    ///
    /// `on_page` receives the running totals after each page.
    pub async fn run<F>(&self, mut on_page: F) -> Result<VerifySummary>
    where
        F: FnMut(&VerifySummary) + Send,
    {
        let mut summary = VerifySummary::default();
        let mut after_seq = 0;

        tracing::info!(cache_dir = %self.layout.root().display(), "Verifying cache");

        loop {
            let page = self.db.downloaded_after(after_seq, self.page_size).await?;
            let Some(last) = page.last() else {
                break;
            };
            after_seq = last.seq;

            for record in &page {
                summary.checked += 1;
                if let Some(reason) = self.missing_reason(record).await {
                    tracing::warn!(caa_id = record.id.get(), reason = %reason, "Cached artifact missing");
                    self.db.reset_to_pending(record.id, &reason).await?;
                    summary.missing += 1;
                }
            }

            on_page(&summary);
        }

        tracing::info!(
            checked = summary.checked,
            missing = summary.missing,
            "Cache verification finished"
        );

        Ok(summary)
    }

    /// Why the record's cache file does not count as present, if it doesn't
    async fn missing_reason(&self, record: &Record) -> Option<String> {
        let path = match self.layout.path_for(record) {
            Ok(path) => path,
            Err(e) => return Some(e.to_string()),
        };

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => None,
            Ok(meta) if meta.is_file() => Some(format!("cache file {} is empty", path.display())),
            Ok(_) => Some(format!("cache path {} is not a file", path.display())),
            Err(e) => Some(format!("cache file {} unreadable: {}", path.display(), e)),
        }
    }
}
