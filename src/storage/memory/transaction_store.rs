//! In-memory transactions table.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::FaultInjector;
use crate::model::TransactionRecord;
use crate::storage::{InsertOutcome, Result, TransactionStore};

#[derive(Default)]
pub struct MemoryTransactionStore {
    records: RwLock<BTreeMap<String, TransactionRecord>>,
    faults: FaultInjector,
}

impl MemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl TransactionStore for MemoryTransactionStore {
    async fn get(&self, id: &str) -> Result<Option<TransactionRecord>> {
        self.faults.check("transactions").await?;
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn insert(&self, record: &TransactionRecord) -> Result<InsertOutcome> {
        self.faults.check("transactions").await?;
        // Check and insert under one write lock so concurrent inserts of the
        // same id cannot both succeed.
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        records.insert(record.id.clone(), record.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn list(&self) -> Result<Vec<TransactionRecord>> {
        self.faults.check("transactions").await?;
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn list_by_description(&self, description: &str) -> Result<Vec<TransactionRecord>> {
        self.faults.check("transactions").await?;
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.description == description)
            .cloned()
            .collect())
    }

    async fn set_category(&self, id: &str, category: &str) -> Result<bool> {
        self.faults.check("transactions").await?;
        match self.records.write().await.get_mut(id) {
            Some(record) => {
                record.category = Some(category.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
