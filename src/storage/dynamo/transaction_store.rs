//! DynamoDB transactions table.

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use tracing::debug;

use super::{
    backend_error, number_attr, optional_string_attr, string_attr, timestamp_attr,
    timestamp_value, Item,
};
use crate::model::TransactionRecord;
use crate::storage::{InsertOutcome, Result, TransactionStore};

pub struct DynamoTransactionStore {
    client: Client,
    table_name: String,
}

impl DynamoTransactionStore {
    pub fn new(client: Client, table_name: String) -> Self {
        Self { client, table_name }
    }

    fn to_item(record: &TransactionRecord) -> Item {
        let mut item = Item::new();
        item.insert("id".to_string(), AttributeValue::S(record.id.clone()));
        item.insert(
            "sourceId".to_string(),
            AttributeValue::S(record.source_id.clone()),
        );
        item.insert(
            "description".to_string(),
            AttributeValue::S(record.description.clone()),
        );
        item.insert(
            "amount".to_string(),
            AttributeValue::N(record.amount.to_string()),
        );
        if let Some(ref category) = record.category {
            item.insert("category".to_string(), AttributeValue::S(category.clone()));
        }
        item.insert("createdAt".to_string(), timestamp_value(&record.created_at));
        item
    }

    fn from_item(item: &Item) -> Result<TransactionRecord> {
        Ok(TransactionRecord {
            id: string_attr(item, "id")?,
            source_id: string_attr(item, "sourceId")?,
            description: string_attr(item, "description")?,
            amount: number_attr(item, "amount")?,
            category: optional_string_attr(item, "category")?,
            created_at: timestamp_attr(item, "createdAt")?,
        })
    }

    /// Scan the table, following pagination, with an optional description filter.
    async fn scan(&self, description: Option<&str>) -> Result<Vec<TransactionRecord>> {
        let mut records = Vec::new();
        let mut start_key: Option<Item> = None;

        loop {
            let mut request = self
                .client
                .scan()
                .table_name(&self.table_name)
                .set_exclusive_start_key(start_key.take());

            if let Some(description) = description {
                request = request
                    .filter_expression("#d = :d")
                    .expression_attribute_names("#d", "description")
                    .expression_attribute_values(":d", AttributeValue::S(description.to_string()));
            }

            let output = request
                .send()
                .await
                .map_err(|e| backend_error("transactions.scan", e))?;

            for item in output.items() {
                records.push(Self::from_item(item)?);
            }

            match output.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl TransactionStore for DynamoTransactionStore {
    async fn get(&self, id: &str) -> Result<Option<TransactionRecord>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("id", AttributeValue::S(id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| backend_error("transactions.get_item", e))?;

        output.item().map(Self::from_item).transpose()
    }

    async fn insert(&self, record: &TransactionRecord) -> Result<InsertOutcome> {
        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(Self::to_item(record)))
            .condition_expression("attribute_not_exists(id)")
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!(table = %self.table_name, id = %record.id, "Inserted transaction");
                Ok(InsertOutcome::Inserted)
            }
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_conditional_check_failed_exception()) =>
            {
                Ok(InsertOutcome::AlreadyExists)
            }
            Err(err) => Err(backend_error("transactions.put_item", err)),
        }
    }

    async fn list(&self) -> Result<Vec<TransactionRecord>> {
        self.scan(None).await
    }

    async fn list_by_description(&self, description: &str) -> Result<Vec<TransactionRecord>> {
        self.scan(Some(description)).await
    }

    async fn set_category(&self, id: &str, category: &str) -> Result<bool> {
        let result = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key("id", AttributeValue::S(id.to_string()))
            .update_expression("SET category = :c")
            .condition_expression("attribute_exists(id)")
            .expression_attribute_values(":c", AttributeValue::S(category.to_string()))
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_conditional_check_failed_exception()) =>
            {
                Ok(false)
            }
            Err(err) => Err(backend_error("transactions.update_item", err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::model::Amount;

    #[test]
    fn test_item_mapping_omits_unset_category() {
        let record = TransactionRecord {
            id: "t-1".to_string(),
            source_id: "s-1".to_string(),
            description: "Coffee Shop".to_string(),
            amount: Amount::from_cents(-307),
            category: None,
            created_at: Utc::now(),
        };

        let item = DynamoTransactionStore::to_item(&record);
        assert!(!item.contains_key("category"));
        assert_eq!(item.get("amount"), Some(&AttributeValue::N("-3.07".to_string())));

        let decoded = DynamoTransactionStore::from_item(&item).unwrap();
        assert_eq!(decoded.amount, record.amount);
        assert_eq!(decoded.category, None);
        assert_eq!(decoded.description, "Coffee Shop");
    }
}
