//! In-memory monthly periods table.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::FaultInjector;
use crate::model::PeriodRecord;
use crate::storage::{PeriodStore, Result};

#[derive(Default)]
pub struct MemoryPeriodStore {
    periods: RwLock<HashMap<String, PeriodRecord>>,
    faults: FaultInjector,
}

impl MemoryPeriodStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }
}

#[async_trait]
impl PeriodStore for MemoryPeriodStore {
    async fn get(&self, month: &str) -> Result<Option<PeriodRecord>> {
        self.faults.check("periods").await?;
        Ok(self.periods.read().await.get(month).cloned())
    }

    async fn upsert(&self, record: &PeriodRecord) -> Result<()> {
        self.faults.check("periods").await?;
        self.periods
            .write()
            .await
            .insert(record.month.clone(), record.clone());
        Ok(())
    }
}
