//! Capability-checked, time-bounded access to the tables.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::{InsertOutcome, Result, StoreError, Stores};
use crate::capability::{Capability, CapabilitySet, Table};
use crate::model::{CategoryMapping, PeriodRecord, SourceRecord, TransactionRecord};

/// The view of the tables a single handler is allowed to use.
///
/// Every call first checks the handler's grants and then runs the backend
/// operation under `op_timeout`. A missing grant fails with
/// [`StoreError::Forbidden`] without touching the backend; an expired timeout
/// fails with [`StoreError::Timeout`].
#[derive(Clone)]
pub struct ScopedStores {
    holder: &'static str,
    stores: Stores,
    grants: CapabilitySet,
    op_timeout: Duration,
}

impl ScopedStores {
    pub fn new(
        holder: &'static str,
        stores: Stores,
        grants: CapabilitySet,
        op_timeout: Duration,
    ) -> Self {
        Self {
            holder,
            stores,
            grants,
            op_timeout,
        }
    }

    pub fn holder(&self) -> &'static str {
        self.holder
    }

    pub fn grants(&self) -> &CapabilitySet {
        &self.grants
    }

    fn require(&self, capability: Capability) -> Result<()> {
        if self.grants.allows(capability) {
            Ok(())
        } else {
            warn!(
                holder = self.holder,
                capability = %capability,
                "Store access denied"
            );
            Err(StoreError::Forbidden {
                holder: self.holder,
                capability,
            })
        }
    }

    async fn timed<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                operation,
                after: self.op_timeout,
            }),
        }
    }

    pub async fn append_source(&self, record: SourceRecord) -> Result<()> {
        self.require(Table::Sms.write())?;
        self.timed("sms.append", self.stores.sms.append(record))
            .await
    }

    pub async fn get_transaction(&self, id: &str) -> Result<Option<TransactionRecord>> {
        self.require(Table::Transactions.read())?;
        self.timed("transactions.get", self.stores.transactions.get(id))
            .await
    }

    pub async fn insert_transaction(&self, record: &TransactionRecord) -> Result<InsertOutcome> {
        self.require(Table::Transactions.write())?;
        self.timed("transactions.insert", self.stores.transactions.insert(record))
            .await
    }

    pub async fn list_transactions(&self) -> Result<Vec<TransactionRecord>> {
        self.require(Table::Transactions.read())?;
        self.timed("transactions.list", self.stores.transactions.list())
            .await
    }

    pub async fn transactions_with_description(
        &self,
        description: &str,
    ) -> Result<Vec<TransactionRecord>> {
        self.require(Table::Transactions.read())?;
        self.timed(
            "transactions.list_by_description",
            self.stores.transactions.list_by_description(description),
        )
        .await
    }

    pub async fn set_transaction_category(&self, id: &str, category: &str) -> Result<bool> {
        self.require(Table::Transactions.write())?;
        self.timed(
            "transactions.set_category",
            self.stores.transactions.set_category(id, category),
        )
        .await
    }

    pub async fn get_category(&self, description: &str) -> Result<Option<CategoryMapping>> {
        self.require(Table::Categories.read())?;
        self.timed("categories.get", self.stores.categories.get(description))
            .await
    }

    pub async fn upsert_category(&self, mapping: &CategoryMapping) -> Result<()> {
        self.require(Table::Categories.write())?;
        self.timed("categories.upsert", self.stores.categories.upsert(mapping))
            .await
    }

    pub async fn get_period(&self, month: &str) -> Result<Option<PeriodRecord>> {
        self.require(Table::Periods.read())?;
        self.timed("periods.get", self.stores.periods.get(month))
            .await
    }

    pub async fn upsert_period(&self, record: &PeriodRecord) -> Result<()> {
        self.require(Table::Periods.write())?;
        self.timed("periods.upsert", self.stores.periods.upsert(record))
            .await
    }
}
