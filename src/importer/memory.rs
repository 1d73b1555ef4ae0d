use std::collections::VecDeque;

use super::RecordSource;
use crate::error::Result;
use crate::types::NewRecord;

/// In-memory [`RecordSource`] over a fixed list of records
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    records: VecDeque<NewRecord>,
}

impl MemorySource {
    /// Yield `records` in order
    pub fn new(records: impl IntoIterator<Item = NewRecord>) -> Self {
        Self {
            records: records.into_iter().collect(),
        }
    }

    /// Records not yet yielded
    pub fn remaining(&self) -> usize {
        self.records.len()
    }
}

#[async_trait::async_trait]
impl RecordSource for MemorySource {
    async fn total(&mut self) -> Result<Option<u64>> {
        Ok(Some(self.records.len() as u64))
    }

    async fn next_batch(&mut self, limit: usize) -> Result<Vec<NewRecord>> {
        let take = limit.min(self.records.len());
        Ok(self.records.drain(..take).collect())
    }
}
