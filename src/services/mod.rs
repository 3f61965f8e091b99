//! Operations behind the HTTP routes.
//!
//! Each function takes the [`ScopedStores`] of the route calling it, so a
//! route can only touch the tables it was granted.

mod category;
mod period;

pub use category::{update_category, CategoryUpdate};
pub use period::{get_period, update_period, validate_month};

use crate::model::TransactionRecord;
use crate::storage::{ScopedStores, StoreError};

/// Errors returned by the services.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// All transactions, newest `createdAt` first.
pub async fn list_transactions(
    stores: &ScopedStores,
) -> Result<Vec<TransactionRecord>, ServiceError> {
    let mut transactions = stores.list_transactions().await?;
    transactions.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(transactions)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::capability::grants;
    use crate::model::{Amount, TransactionRecord};
    use crate::storage::{MemoryTables, TransactionStore};

    #[tokio::test]
    async fn test_list_transactions_newest_first() {
        let tables = MemoryTables::new();
        for (id, day) in [("a", 1), ("b", 3), ("c", 2)] {
            tables
                .transactions
                .insert(&TransactionRecord {
                    id: id.to_string(),
                    source_id: format!("sms-{}", id),
                    description: "Coffee".to_string(),
                    amount: Amount::from_cents(100),
                    category: None,
                    created_at: Utc.with_ymd_and_hms(2021, 1, day, 0, 0, 0).unwrap(),
                })
                .await
                .unwrap();
        }
        let stores = ScopedStores::new(
            "transaction-list",
            tables.stores(),
            grants::transaction_list(),
            Duration::from_secs(1),
        );

        let ids: Vec<String> = list_transactions(&stores)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }
}
