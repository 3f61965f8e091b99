//! In-memory SMS table.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::FaultInjector;
use crate::model::SourceRecord;
use crate::storage::{Result, SourceStore};

/// Append-only log of source records.
///
/// Each append gets the next sequence number, starting at 1. The log doubles
/// as the table's change stream for the in-memory feed source.
#[derive(Default)]
pub struct MemorySourceStore {
    log: RwLock<Vec<(u64, SourceRecord)>>,
    faults: FaultInjector,
}

impl MemorySourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Sequence number of the most recent append, 0 when empty.
    pub async fn head(&self) -> u64 {
        self.log.read().await.last().map(|(seq, _)| *seq).unwrap_or(0)
    }

    /// Up to `max` entries with a sequence number greater than `after`.
    pub async fn read_after(&self, after: u64, max: usize) -> Vec<(u64, SourceRecord)> {
        self.log
            .read()
            .await
            .iter()
            .filter(|(seq, _)| *seq > after)
            .take(max)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.log.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.log.read().await.is_empty()
    }
}

#[async_trait]
impl SourceStore for MemorySourceStore {
    async fn append(&self, record: SourceRecord) -> Result<()> {
        self.faults.check("sms").await?;
        let mut log = self.log.write().await;
        let seq = log.last().map(|(seq, _)| seq + 1).unwrap_or(1);
        log.push((seq, record));
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<SourceRecord>> {
        self.faults.check("sms").await?;
        Ok(self
            .log
            .read()
            .await
            .iter()
            .rev()
            .find(|(_, record)| record.id == id)
            .map(|(_, record)| record.clone()))
    }
}
