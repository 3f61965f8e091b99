//! In-memory tables for standalone mode and tests.
//!
//! Every table carries a [`FaultInjector`] so tests can simulate an
//! unavailable or slow backend.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use super::{Result, StoreError, Stores};

mod category_store;
mod period_store;
mod seed;
mod source_store;
mod transaction_store;


pub use category_store::MemoryCategoryStore;
pub use period_store::MemoryPeriodStore;
pub use seed::{parse_seed_line, seed_source_table, SeedError};
pub use source_store::MemorySourceStore;
pub use transaction_store::MemoryTransactionStore;

/// Failure injection for a single in-memory table.
#[derive(Default)]
pub struct FaultInjector {
    unavailable: RwLock<bool>,
    fail_next: RwLock<u32>,
    latency: RwLock<Option<Duration>>,
}

impl FaultInjector {
    /// Fail every call until cleared.
    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }

    /// Fail the next `count` calls, then recover.
    pub async fn fail_next(&self, count: u32) {
        *self.fail_next.write().await = count;
    }

    /// Delay every call by `latency` before it runs.
    pub async fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write().await = latency;
    }

    pub(crate) async fn check(&self, table: &'static str) -> Result<()> {
        let latency = *self.latency.read().await;
        if let Some(delay) = latency {
            tokio::time::sleep(delay).await;
        }

        if *self.unavailable.read().await {
            return Err(StoreError::Unavailable(format!("{} table unavailable", table)));
        }

        let mut remaining = self.fail_next.write().await;
        if *remaining > 0 {
            *remaining -= 1;
            return Err(StoreError::Unavailable(format!(
                "{} table rejected request",
                table
            )));
        }

        Ok(())
    }
}

/// The four tables held in memory.
#[derive(Default)]
pub struct MemoryTables {
    pub sms: Arc<MemorySourceStore>,
    pub transactions: Arc<MemoryTransactionStore>,
    pub categories: Arc<MemoryCategoryStore>,
    pub periods: Arc<MemoryPeriodStore>,
}

impl MemoryTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trait-object handles sharing these tables.
    pub fn stores(&self) -> Stores {
        Stores {
            sms: self.sms.clone(),
            transactions: self.transactions.clone(),
            categories: self.categories.clone(),
            periods: self.periods.clone(),
        }
    }
}
