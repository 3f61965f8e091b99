//! TransactionStore trait definition.

use async_trait::async_trait;

use super::Result;
use crate::model::TransactionRecord;

/// Outcome of a conditional insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A record with the same id was already present; nothing was written.
    AlreadyExists,
}

/// Interface for the transactions table, keyed by `id`.
///
/// Implementations:
/// - `MemoryTransactionStore`: in-memory table for standalone mode and tests
/// - `DynamoTransactionStore`: DynamoDB table
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Fetch a transaction by id.
    async fn get(&self, id: &str) -> Result<Option<TransactionRecord>>;

    /// Insert a transaction unless one with the same id exists.
    ///
    /// Must be atomic with respect to concurrent inserts of the same id.
    async fn insert(&self, record: &TransactionRecord) -> Result<InsertOutcome>;

    /// List every transaction.
    async fn list(&self) -> Result<Vec<TransactionRecord>>;

    /// List transactions with exactly this description.
    async fn list_by_description(&self, description: &str) -> Result<Vec<TransactionRecord>>;

    /// Set the category of an existing transaction.
    ///
    /// Returns `false` if no transaction with that id exists.
    async fn set_category(&self, id: &str, category: &str) -> Result<bool>;
}
