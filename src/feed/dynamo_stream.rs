//! Feed source over the DynamoDB Stream of the sms table.
//!
//! [`DynamoShardApi`] maps `DescribeStream`, `GetShardIterator` and
//! `GetRecords` onto [`ShardApi`]; shard bookkeeping lives in
//! [`ShardReader`]. Only `INSERT` records are delivered and the item's
//! `NewImage` becomes the source record.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodbstreams::error::DisplayErrorContext;
use aws_sdk_dynamodbstreams::types::{AttributeValue, OperationType, Record, ShardIteratorType};
use aws_sdk_dynamodbstreams::Client as StreamsClient;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::shards::{
    IteratorPosition, ReadError, RecordsPage, ShardApi, ShardInfo, ShardReader, ShardRecord,
};
use super::{FeedError, StartingPosition};
use crate::model::SourceRecord;
use crate::storage::dynamo::DynamoTables;

/// Reads INSERT records from a DynamoDB Stream.
pub type DynamoStreamSource = ShardReader<DynamoShardApi>;

/// DynamoDB Streams calls for one stream.
pub struct DynamoShardApi {
    client: StreamsClient,
    stream_arn: String,
}

impl DynamoShardApi {
    pub fn new(client: StreamsClient, stream_arn: impl Into<String>) -> Self {
        Self {
            client,
            stream_arn: stream_arn.into(),
        }
    }
}

impl ShardReader<DynamoShardApi> {
    /// Attach to the stream of the sms table.
    ///
    /// Uses the configured stream ARN, or the table's latest stream when none
    /// is configured.
    pub async fn attach(tables: &DynamoTables, position: StartingPosition) -> Result<Self, FeedError> {
        let stream_arn = match tables.stream_arn() {
            Some(arn) => arn.to_string(),
            None => {
                let dynamo = aws_sdk_dynamodb::Client::new(tables.sdk_config());
                let output = dynamo
                    .describe_table()
                    .table_name(tables.sms_table_name())
                    .send()
                    .await
                    .map_err(|e| {
                        FeedError::Source(format!(
                            "describe_table: {}",
                            aws_sdk_dynamodb::error::DisplayErrorContext(e)
                        ))
                    })?;
                output
                    .table()
                    .and_then(|t| t.latest_stream_arn())
                    .map(str::to_string)
                    .ok_or_else(|| FeedError::StreamNotFound(tables.sms_table_name().to_string()))?
            }
        };

        info!(stream_arn = %stream_arn, ?position, "Attached to DynamoDB stream");

        let api = DynamoShardApi::new(StreamsClient::new(tables.sdk_config()), stream_arn);
        Ok(ShardReader::new(api, position))
    }
}

#[async_trait]
impl ShardApi for DynamoShardApi {
    async fn list_shards(&self) -> Result<Vec<ShardInfo>, FeedError> {
        let mut shards = Vec::new();
        let mut start_shard: Option<String> = None;

        loop {
            let output = self
                .client
                .describe_stream()
                .stream_arn(&self.stream_arn)
                .set_exclusive_start_shard_id(start_shard.take())
                .send()
                .await
                .map_err(|e| FeedError::Source(format!("describe_stream: {}", DisplayErrorContext(e))))?;

            let Some(description) = output.stream_description() else {
                return Err(FeedError::StreamNotFound(self.stream_arn.clone()));
            };

            for shard in description.shards() {
                let Some(shard_id) = shard.shard_id() else {
                    continue;
                };
                shards.push(ShardInfo {
                    shard_id: shard_id.to_string(),
                    parent_shard_id: shard.parent_shard_id().map(str::to_string),
                    closed: shard
                        .sequence_number_range()
                        .and_then(|r| r.ending_sequence_number())
                        .is_some(),
                });
            }

            match description.last_evaluated_shard_id() {
                Some(last) => start_shard = Some(last.to_string()),
                None => break,
            }
        }

        Ok(shards)
    }

    async fn shard_iterator(
        &self,
        shard_id: &str,
        position: IteratorPosition,
    ) -> Result<Option<String>, FeedError> {
        let (iterator_type, sequence_number) = match position {
            IteratorPosition::Latest => (ShardIteratorType::Latest, None),
            IteratorPosition::TrimHorizon => (ShardIteratorType::TrimHorizon, None),
            IteratorPosition::AfterSequence(sequence) => {
                (ShardIteratorType::AfterSequenceNumber, Some(sequence))
            }
        };

        let output = self
            .client
            .get_shard_iterator()
            .stream_arn(&self.stream_arn)
            .shard_id(shard_id)
            .shard_iterator_type(iterator_type)
            .set_sequence_number(sequence_number)
            .send()
            .await
            .map_err(|e| FeedError::Source(format!("get_shard_iterator: {}", DisplayErrorContext(e))))?;
        Ok(output.shard_iterator().map(str::to_string))
    }

    async fn read(&self, iterator: &str, limit: usize) -> Result<RecordsPage, ReadError> {
        let output = match self
            .client
            .get_records()
            .shard_iterator(iterator)
            .limit(limit as i32)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_expired_iterator_exception()) =>
            {
                return Err(ReadError::ExpiredIterator)
            }
            Err(err) => {
                return Err(FeedError::Source(format!("get_records: {}", DisplayErrorContext(err))).into())
            }
        };

        let mut records = Vec::new();
        for record in output.records() {
            let Some(sequence) = record.dynamodb().and_then(|r| r.sequence_number()) else {
                continue;
            };
            let source = if record.event_name() == Some(&OperationType::Insert) {
                let source = source_record_from(record);
                if source.is_none() {
                    warn!(sequence, "Stream record without a usable image, skipping");
                }
                source
            } else {
                None
            };
            records.push(ShardRecord {
                sequence: sequence.to_string(),
                record: source,
            });
        }

        Ok(RecordsPage {
            records,
            next_iterator: output.next_shard_iterator().map(str::to_string),
        })
    }
}

/// Build a source record from an INSERT stream record.
///
/// The payload is the item's `body` attribute when present, otherwise the
/// whole image rendered as a JSON object.
fn source_record_from(record: &Record) -> Option<SourceRecord> {
    let stream = record.dynamodb()?;
    let image = stream.new_image()?;

    let id = match image.get("id")? {
        AttributeValue::S(id) => id.clone(),
        AttributeValue::N(id) => id.clone(),
        _ => return None,
    };

    let payload = match image.get("body") {
        Some(AttributeValue::S(body)) => body.clone().into_bytes(),
        _ => serde_json::to_vec(&image_to_json(image)).ok()?,
    };

    let inserted_at = stream
        .approximate_creation_date_time()
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts.secs(), ts.subsec_nanos()))
        .unwrap_or_else(Utc::now);

    Some(SourceRecord {
        id,
        payload,
        inserted_at,
    })
}

/// Render an item image as a JSON object.
pub fn image_to_json(image: &HashMap<String, AttributeValue>) -> serde_json::Value {
    serde_json::Value::Object(
        image
            .iter()
            .map(|(k, v)| (k.clone(), attribute_to_json(v)))
            .collect(),
    )
}

fn attribute_to_json(value: &AttributeValue) -> serde_json::Value {
    use serde_json::Value;

    match value {
        AttributeValue::S(s) => Value::String(s.clone()),
        // Numbers stay strings so decimals survive unchanged.
        AttributeValue::N(n) => Value::String(n.clone()),
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::B(blob) => Value::String(STANDARD.encode(blob.as_ref())),
        AttributeValue::M(map) => image_to_json(map),
        AttributeValue::L(list) => Value::Array(list.iter().map(attribute_to_json).collect()),
        AttributeValue::Ss(items) | AttributeValue::Ns(items) => {
            Value::Array(items.iter().cloned().map(Value::String).collect())
        }
        AttributeValue::Bs(blobs) => Value::Array(
            blobs
                .iter()
                .map(|b| Value::String(STANDARD.encode(b.as_ref())))
                .collect(),
        ),
        _ => Value::Null,
    }
}
