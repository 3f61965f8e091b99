//! DynamoDB category mapping table.

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;

use super::{backend_error, string_attr, timestamp_attr, timestamp_value};
use crate::model::CategoryMapping;
use crate::storage::{CategoryStore, Result};

pub struct DynamoCategoryStore {
    client: Client,
    table_name: String,
}

impl DynamoCategoryStore {
    pub fn new(client: Client, table_name: String) -> Self {
        Self { client, table_name }
    }
}

#[async_trait]
impl CategoryStore for DynamoCategoryStore {
    async fn get(&self, description: &str) -> Result<Option<CategoryMapping>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("description", AttributeValue::S(description.to_string()))
            .send()
            .await
            .map_err(|e| backend_error("categories.get_item", e))?;

        let Some(item) = output.item() else {
            return Ok(None);
        };

        Ok(Some(CategoryMapping {
            description: string_attr(item, "description")?,
            category: string_attr(item, "category")?,
            updated_at: timestamp_attr(item, "updatedAt")?,
        }))
    }

    async fn upsert(&self, mapping: &CategoryMapping) -> Result<()> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .item("description", AttributeValue::S(mapping.description.clone()))
            .item("category", AttributeValue::S(mapping.category.clone()))
            .item("updatedAt", timestamp_value(&mapping.updated_at))
            .send()
            .await
            .map_err(|e| backend_error("categories.put_item", e))?;
        Ok(())
    }
}
