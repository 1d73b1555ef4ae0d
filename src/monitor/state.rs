//! Application state for the monitor server

use std::sync::Arc;

use crate::db::Database;
use crate::downloader::RunStats;

/// Shared state accessible to all route handlers
///
/// Cloned for each request (cheap Arc clone).
#[derive(Clone)]
pub struct MonitorState {
    /// The local index
    pub db: Arc<Database>,

    /// Counters of the running download, absent for a standalone monitor
    pub stats: Option<Arc<RunStats>>,
}

impl MonitorState {
    /// State for a monitor that only reports the index
    pub fn new(db: Arc<Database>) -> Self {
        Self { db, stats: None }
    }

    /// Also report the counters of a download run
    pub fn with_stats(mut self, stats: Arc<RunStats>) -> Self {
        self.stats = Some(stats);
        self
    }
}
