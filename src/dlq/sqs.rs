//! Amazon SQS dead letter sink.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::types::MessageAttributeValue;
use aws_sdk_sqs::Client as SqsClient;
use tracing::info;

use super::{DeadLetterEntry, DeadLetterSink, DlqConfig, DlqError};

/// Queue name when none is configured.
pub const DEFAULT_QUEUE_NAME: &str = "SMSDeadLetterQueue";

/// Prefix for message attribute names.
const ATTR_PREFIX: &str = "x-finance-";

/// Sends each entry as one SQS message.
///
/// The body is the entry JSON. Metadata and the attempt count are repeated as
/// message attributes so consumers can filter without parsing the body.
pub struct SqsDeadLetterSink {
    sqs: SqsClient,
    queue_url: String,
    queue_name: String,
}

impl SqsDeadLetterSink {
    /// Resolve the queue URL and build a client.
    pub async fn connect(config: &DlqConfig) -> Result<Self, DlqError> {
        let mut aws_config_builder = aws_config::defaults(BehaviorVersion::latest());

        if let Some(ref region) = config.region {
            aws_config_builder =
                aws_config_builder.region(aws_config::Region::new(region.clone()));
        }

        if let Some(ref endpoint) = config.endpoint_url {
            aws_config_builder = aws_config_builder.endpoint_url(endpoint);
        }

        let aws_config = aws_config_builder.load().await;
        let sqs = SqsClient::new(&aws_config);

        let queue_name = config
            .queue_name
            .clone()
            .unwrap_or_else(|| DEFAULT_QUEUE_NAME.to_string());

        let result = sqs
            .get_queue_url()
            .queue_name(&queue_name)
            .send()
            .await
            .map_err(|e| DlqError::Connection(format!("Failed to resolve DLQ queue URL: {}", e)))?;

        let queue_url = result
            .queue_url()
            .ok_or_else(|| DlqError::Connection("SQS get_queue_url returned no URL".to_string()))?
            .to_string();

        info!(
            region = ?config.region,
            endpoint = ?config.endpoint_url,
            queue = %queue_name,
            "Connected to SQS dead letter queue"
        );

        Ok(Self {
            sqs,
            queue_url,
            queue_name,
        })
    }

    fn attribute(data_type: &str, value: &str) -> Result<MessageAttributeValue, DlqError> {
        MessageAttributeValue::builder()
            .data_type(data_type)
            .string_value(value)
            .build()
            .map_err(|e| DlqError::PublishFailed(format!("Failed to build attribute: {}", e)))
    }
}

/// Message attribute name for a metadata key.
fn attribute_name(key: &str) -> String {
    format!("{}{}", ATTR_PREFIX, key)
}

#[async_trait]
impl DeadLetterSink for SqsDeadLetterSink {
    async fn deposit(&self, entry: DeadLetterEntry) -> Result<(), DlqError> {
        let body = entry.to_json()?;

        let mut attrs = HashMap::new();
        attrs.insert(
            attribute_name("attempts"),
            Self::attribute("Number", &entry.attempts.to_string())?,
        );
        for (key, value) in &entry.metadata {
            attrs.insert(attribute_name(key), Self::attribute("String", value)?);
        }

        self.sqs
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .set_message_attributes(Some(attrs))
            .send()
            .await
            .map_err(|e| DlqError::PublishFailed(format!("Failed to send to DLQ: {}", e)))?;

        info!(
            source_id = entry.source_id().unwrap_or("unknown"),
            attempts = entry.attempts,
            queue = %self.queue_name,
            "Dead letter sent to SQS"
        );
        Ok(())
    }
}
