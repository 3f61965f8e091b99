//! PeriodStore trait definition.

use async_trait::async_trait;

use super::Result;
use crate::model::PeriodRecord;

/// Interface for the monthly period table, keyed by `YYYY-MM`.
#[async_trait]
pub trait PeriodStore: Send + Sync {
    async fn get(&self, month: &str) -> Result<Option<PeriodRecord>>;

    /// Insert or replace the record for `record.month`.
    async fn upsert(&self, record: &PeriodRecord) -> Result<()>;
}
