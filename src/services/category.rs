//! Category correction with fan-out to existing transactions.

use tracing::info;

use super::ServiceError;
use crate::model::CategoryMapping;
use crate::storage::ScopedStores;

/// Result of a category update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryUpdate {
    pub description: String,
    pub category: String,
    /// Existing transactions whose category was set.
    pub updated: usize,
}

/// Map `description` to `category` and correct every existing transaction
/// with that description.
///
/// The mapping is written first, so events processed while the fan-out runs
/// already pick up the new category.
pub async fn update_category(
    stores: &ScopedStores,
    description: &str,
    category: &str,
) -> Result<CategoryUpdate, ServiceError> {
    let description = description.trim();
    let category = category.trim();
    if description.is_empty() {
        return Err(ServiceError::Invalid("description must not be empty".to_string()));
    }
    if category.is_empty() {
        return Err(ServiceError::Invalid("category must not be empty".to_string()));
    }

    stores
        .upsert_category(&CategoryMapping::new(description, category))
        .await?;

    let mut updated = 0;
    for transaction in stores.transactions_with_description(description).await? {
        // Rows deleted since the scan are skipped.
        if stores
            .set_transaction_category(&transaction.id, category)
            .await?
        {
            updated += 1;
        }
    }

    info!(description, category, updated, "Category mapping updated");

    Ok(CategoryUpdate {
        description: description.to_string(),
        category: category.to_string(),
        updated,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::capability::grants;
    use crate::model::{Amount, TransactionRecord};
    use crate::storage::{CategoryStore, MemoryTables, StoreError, TransactionStore};

    fn scoped(tables: &MemoryTables) -> ScopedStores {
        ScopedStores::new(
            "category-update",
            tables.stores(),
            grants::category_update(),
            Duration::from_secs(1),
        )
    }

    async fn seed(tables: &MemoryTables, id: &str, description: &str, category: Option<&str>) {
        tables
            .transactions
            .insert(&TransactionRecord {
                id: id.to_string(),
                source_id: format!("sms-{}", id),
                description: description.to_string(),
                amount: Amount::from_cents(450),
                category: category.map(str::to_string),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fans_out_to_matching_transactions_only() {
        let tables = MemoryTables::new();
        seed(&tables, "t1", "Coffee Shop", None).await;
        seed(&tables, "t2", "Coffee Shop", Some("Misc")).await;
        seed(&tables, "t3", "Book Store", None).await;

        let result = update_category(&scoped(&tables), "Coffee Shop", "Food")
            .await
            .unwrap();
        assert_eq!(result.updated, 2);

        for id in ["t1", "t2"] {
            let t = tables.transactions.get(id).await.unwrap().unwrap();
            assert_eq!(t.category.as_deref(), Some("Food"));
        }
        let other = tables.transactions.get("t3").await.unwrap().unwrap();
        assert_eq!(other.category, None);

        let mapping = tables.categories.get("Coffee Shop").await.unwrap().unwrap();
        assert_eq!(mapping.category, "Food");
    }

    #[tokio::test]
    async fn test_update_without_matches_still_writes_mapping() {
        let tables = MemoryTables::new();
        let result = update_category(&scoped(&tables), " Gym ", "Health")
            .await
            .unwrap();

        assert_eq!(result.updated, 0);
        assert_eq!(result.description, "Gym");
        assert!(tables.categories.get("Gym").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_blank_values_are_rejected() {
        let tables = MemoryTables::new();
        let err = update_category(&scoped(&tables), "  ", "Food")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Invalid(_)));

        let err = update_category(&scoped(&tables), "Coffee", "")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Invalid(_)));
        assert!(tables.categories.is_empty().await);
    }

    #[tokio::test]
    async fn test_store_outage_surfaces() {
        let tables = MemoryTables::new();
        tables.categories.faults().set_unavailable(true).await;

        let err = update_category(&scoped(&tables), "Coffee", "Food")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Store(StoreError::Unavailable(_))));
    }
}
