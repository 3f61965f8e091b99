//! DynamoDB monthly periods table.

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;

use super::{backend_error, string_attr, timestamp_attr, timestamp_value};
use crate::model::PeriodRecord;
use crate::storage::{PeriodStore, Result, StoreError};

pub struct DynamoPeriodStore {
    client: Client,
    table_name: String,
}

impl DynamoPeriodStore {
    pub fn new(client: Client, table_name: String) -> Self {
        Self { client, table_name }
    }
}

#[async_trait]
impl PeriodStore for DynamoPeriodStore {
    async fn get(&self, month: &str) -> Result<Option<PeriodRecord>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("month", AttributeValue::S(month.to_string()))
            .send()
            .await
            .map_err(|e| backend_error("periods.get_item", e))?;

        let Some(item) = output.item() else {
            return Ok(None);
        };

        let data = serde_json::from_str(&string_attr(item, "data")?)
            .map_err(|e| StoreError::Serialization(format!("attribute 'data': {}", e)))?;

        Ok(Some(PeriodRecord {
            month: string_attr(item, "month")?,
            data,
            updated_at: timestamp_attr(item, "updatedAt")?,
        }))
    }

    async fn upsert(&self, record: &PeriodRecord) -> Result<()> {
        let data = serde_json::to_string(&record.data)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        self.client
            .put_item()
            .table_name(&self.table_name)
            .item("month", AttributeValue::S(record.month.clone()))
            .item("data", AttributeValue::S(data))
            .item("updatedAt", timestamp_value(&record.updated_at))
            .send()
            .await
            .map_err(|e| backend_error("periods.put_item", e))?;
        Ok(())
    }
}
