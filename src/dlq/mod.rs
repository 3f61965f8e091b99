//! Dead letter sink for change events the feed gave up on.
//!
//! An event lands here when its handler failed with a non-retryable error, or
//! kept failing with retryable errors until the retry budget ran out. The
//! entry keeps the raw source payload so it can be replayed by hand.
//!
//! ## Message Format
//!
//! JSON, camelCase:
//!
//! ```json
//! {
//!   "originalPayload": "<base64>",
//!   "failureReason": "store unavailable: ...",
//!   "attempts": 2,
//!   "metadata": {"sourceId": "...", "sequenceToken": "...", "failedAt": "...", "errorKind": "..."}
//! }
//! ```
//!
//! `metadata` is omitted when empty.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::model::ChangeEvent;

#[cfg(feature = "sqs")]
pub mod sqs;

/// Metadata key: id of the source record.
pub const META_SOURCE_ID: &str = "sourceId";
/// Metadata key: stream position of the failed change.
pub const META_SEQUENCE_TOKEN: &str = "sequenceToken";
/// Metadata key: RFC 3339 time the entry was created.
pub const META_FAILED_AT: &str = "failedAt";
/// Metadata key: short machine-readable failure class.
pub const META_ERROR_KIND: &str = "errorKind";

/// Errors that can occur during DLQ operations.
#[derive(Debug, thiserror::Error)]
pub enum DlqError {
    #[error("DLQ not configured")]
    NotConfigured,

    #[error("Failed to serialize dead letter: {0}")]
    Serialization(String),

    #[error("Failed to publish to DLQ: {0}")]
    PublishFailed(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

/// A change event that exhausted its retry budget or failed permanently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEntry {
    #[serde(with = "base64_bytes")]
    pub original_payload: Vec<u8>,
    pub failure_reason: String,
    /// Deliveries made before giving up.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl DeadLetterEntry {
    pub fn new(original_payload: Vec<u8>, failure_reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            original_payload,
            failure_reason: failure_reason.into(),
            attempts,
            metadata: BTreeMap::new(),
        }
    }

    /// Create an entry from the last failed delivery of an event.
    pub fn from_failed_event(event: &ChangeEvent, reason: impl Into<String>, attempts: u32) -> Self {
        Self::new(event.record.payload.clone(), reason, attempts)
            .with_metadata(META_SOURCE_ID, &event.record.id)
            .with_metadata(META_SEQUENCE_TOKEN, event.sequence_token.as_str())
            .with_metadata(META_FAILED_AT, &Utc::now().to_rfc3339())
    }

    /// Add metadata to the entry.
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn source_id(&self) -> Option<&str> {
        self.metadata.get(META_SOURCE_ID).map(String::as_str)
    }

    pub fn to_json(&self) -> Result<String, DlqError> {
        serde_json::to_string(self).map_err(|e| DlqError::Serialization(e.to_string()))
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Trait for depositing entries into a dead letter queue.
///
/// Implementations handle the actual transport (SQS, in-memory, log only).
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Durably append an entry.
    async fn deposit(&self, entry: DeadLetterEntry) -> Result<(), DlqError>;

    /// Check if the sink is configured and ready.
    fn is_configured(&self) -> bool {
        true
    }
}

/// Deposit an entry, logging instead of propagating failure.
///
/// Returns whether the entry was accepted. The caller moves on either way.
pub async fn deposit_best_effort(sink: &dyn DeadLetterSink, entry: DeadLetterEntry) -> bool {
    let source_id = entry.source_id().unwrap_or("unknown").to_string();
    let attempts = entry.attempts;

    match sink.deposit(entry).await {
        Ok(()) => true,
        Err(e) => {
            error!(
                source_id = %source_id,
                attempts,
                error = %e,
                "Failed to deposit dead letter, entry dropped"
            );
            false
        }
    }
}

/// Sink that logs but doesn't send anywhere.
///
/// Used when no DLQ is configured.
pub struct NoopDeadLetterSink;

#[async_trait]
impl DeadLetterSink for NoopDeadLetterSink {
    async fn deposit(&self, entry: DeadLetterEntry) -> Result<(), DlqError> {
        warn!(
            source_id = entry.source_id().unwrap_or("unknown"),
            reason = %entry.failure_reason,
            attempts = entry.attempts,
            "DLQ not configured, logging dead letter"
        );
        Ok(())
    }

    fn is_configured(&self) -> bool {
        false
    }
}

/// In-memory sink using a channel.
///
/// Used for standalone mode and testing.
pub struct ChannelDeadLetterSink {
    sender: mpsc::UnboundedSender<DeadLetterEntry>,
}

impl ChannelDeadLetterSink {
    /// Create a new channel-based sink.
    ///
    /// Returns the sink and a receiver for consuming entries.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DeadLetterEntry>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl DeadLetterSink for ChannelDeadLetterSink {
    async fn deposit(&self, entry: DeadLetterEntry) -> Result<(), DlqError> {
        info!(
            source_id = entry.source_id().unwrap_or("unknown"),
            reason = %entry.failure_reason,
            "Publishing to channel DLQ"
        );
        self.sender
            .send(entry)
            .map_err(|e| DlqError::PublishFailed(e.to_string()))
    }
}

/// DLQ backend discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DlqType {
    /// Log entries only.
    #[default]
    Log,
    /// Amazon SQS queue.
    Sqs,
}

/// Configuration for DLQ sinks.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DlqConfig {
    #[serde(rename = "type")]
    pub dlq_type: DlqType,
    /// SQS queue name (for the SQS sink).
    pub queue_name: Option<String>,
    /// AWS region. Uses the default provider chain if not set.
    pub region: Option<String>,
    /// Custom endpoint URL (LocalStack).
    pub endpoint_url: Option<String>,
}

impl DlqConfig {
    /// Check if a durable DLQ backend is configured.
    pub fn is_configured(&self) -> bool {
        self.dlq_type != DlqType::Log
    }
}

/// Create a DLQ sink based on configuration.
///
/// Returns [`NoopDeadLetterSink`] if nothing durable is configured.
pub async fn create_sink(config: &DlqConfig) -> Result<Arc<dyn DeadLetterSink>, DlqError> {
    match config.dlq_type {
        DlqType::Log => {
            debug!("No DLQ configured, using noop sink");
            Ok(Arc::new(NoopDeadLetterSink))
        }
        #[cfg(feature = "sqs")]
        DlqType::Sqs => Ok(Arc::new(sqs::SqsDeadLetterSink::connect(config).await?)),
        #[cfg(not(feature = "sqs"))]
        DlqType::Sqs => {
            error!("SQS DLQ requested but 'sqs' feature is not enabled");
            Err(DlqError::Connection("SQS feature not enabled".to_string()))
        }
    }
}
