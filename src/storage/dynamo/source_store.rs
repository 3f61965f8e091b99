//! DynamoDB sms table.

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use tracing::debug;

use super::{backend_error, string_attr, timestamp_attr, timestamp_value};
use crate::model::SourceRecord;
use crate::storage::{Result, SourceStore};

pub struct DynamoSourceStore {
    client: Client,
    table_name: String,
}

impl DynamoSourceStore {
    pub fn new(client: Client, table_name: String) -> Self {
        Self { client, table_name }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

#[async_trait]
impl SourceStore for DynamoSourceStore {
    async fn append(&self, record: SourceRecord) -> Result<()> {
        let body = String::from_utf8_lossy(&record.payload).into_owned();
        self.client
            .put_item()
            .table_name(&self.table_name)
            .item("id", AttributeValue::S(record.id.clone()))
            .item("body", AttributeValue::S(body))
            .item("insertedAt", timestamp_value(&record.inserted_at))
            .send()
            .await
            .map_err(|e| backend_error("sms.put_item", e))?;

        debug!(table = %self.table_name, source_id = %record.id, "Appended source record");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<SourceRecord>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("id", AttributeValue::S(id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| backend_error("sms.get_item", e))?;

        let Some(item) = output.item() else {
            return Ok(None);
        };

        Ok(Some(SourceRecord {
            id: string_attr(item, "id")?,
            payload: string_attr(item, "body")?.into_bytes(),
            inserted_at: timestamp_attr(item, "insertedAt")?,
        }))
    }
}
