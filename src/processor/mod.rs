//! SMS processor: turns each sms table insert into one transaction record.
//!
//! Per event:
//! 1. Parse the payload. Unparseable payloads fail permanently.
//! 2. Derive the transaction id from the source id and stop if it exists.
//! 3. Look up the description's category mapping, if any.
//! 4. Insert the transaction conditionally; losing a race counts as a duplicate.
//!
//! The processor never retries. Store failures surface as
//! [`ProcessingError::StoreUnavailable`] and the feed decides what happens next.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, Instrument};

use crate::capability::grants;
use crate::feed::{EventHandler, Retryable};
use crate::model::{transaction_id_for, ChangeEvent, TransactionRecord};
use crate::storage::{InsertOutcome, ScopedStores, StoreError, Stores};

mod message;

pub use message::SmsMessage;

/// Holder name used in capability errors and logs.
pub const PROCESSOR_HOLDER: &str = "sms-processor";

/// Result of handling one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
    /// A new transaction was written.
    Written(TransactionRecord),
    /// The transaction already existed; nothing was written.
    Duplicate { id: String },
}

/// Errors that can occur while processing an event.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Store access forbidden: {0}")]
    Forbidden(String),
}

impl From<StoreError> for ProcessingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Forbidden { .. } => ProcessingError::Forbidden(err.to_string()),
            other => ProcessingError::StoreUnavailable(other.to_string()),
        }
    }
}

impl Retryable for ProcessingError {
    fn is_retryable(&self) -> bool {
        matches!(self, ProcessingError::StoreUnavailable(_))
    }

    fn kind(&self) -> &'static str {
        match self {
            ProcessingError::MalformedPayload(_) => "malformed_payload",
            ProcessingError::StoreUnavailable(_) => "store_unavailable",
            ProcessingError::Forbidden(_) => "forbidden",
        }
    }
}

/// Stream-triggered handler for the sms table.
pub struct SmsProcessor {
    stores: ScopedStores,
}

impl SmsProcessor {
    /// Create a processor holding the processor's grants.
    pub fn new(stores: Stores, op_timeout: Duration) -> Self {
        Self::with_scoped(ScopedStores::new(
            PROCESSOR_HOLDER,
            stores,
            grants::sms_processor(),
            op_timeout,
        ))
    }

    /// Create a processor over an explicitly scoped store view.
    pub fn with_scoped(stores: ScopedStores) -> Self {
        Self { stores }
    }

    /// Handle one change event.
    pub async fn process(&self, event: &ChangeEvent) -> Result<ProcessingOutcome, ProcessingError> {
        let span = tracing::info_span!(
            "processor.handle",
            source_id = %event.record.id,
            attempt = event.delivery_attempt,
            sequence = %event.sequence_token
        );
        self.process_inner(event).instrument(span).await
    }

    async fn process_inner(&self, event: &ChangeEvent) -> Result<ProcessingOutcome, ProcessingError> {
        debug!("Received");

        let message = SmsMessage::parse(&event.record.payload)
            .map_err(ProcessingError::MalformedPayload)?;
        debug!(description = %message.description, amount = %message.amount, "Parsed");

        let id = transaction_id_for(&event.record.id);
        if self.stores.get_transaction(&id).await?.is_some() {
            debug!(transaction_id = %id, "Duplicate delivery, nothing to write");
            return Ok(ProcessingOutcome::Duplicate { id });
        }

        let category = self
            .stores
            .get_category(&message.description)
            .await?
            .map(|mapping| mapping.category);

        let record = TransactionRecord {
            id,
            source_id: event.record.id.clone(),
            description: message.description,
            amount: message.amount,
            category,
            created_at: message.occurred_at.unwrap_or(event.record.inserted_at),
        };

        match self.stores.insert_transaction(&record).await? {
            InsertOutcome::Inserted => {
                info!(
                    transaction_id = %record.id,
                    category = ?record.category,
                    "Transaction written"
                );
                Ok(ProcessingOutcome::Written(record))
            }
            InsertOutcome::AlreadyExists => {
                debug!(transaction_id = %record.id, "Lost insert race, treating as duplicate");
                Ok(ProcessingOutcome::Duplicate { id: record.id })
            }
        }
    }
}

#[async_trait]
impl EventHandler for SmsProcessor {
    type Outcome = ProcessingOutcome;
    type Error = ProcessingError;

    async fn handle(&self, event: &ChangeEvent) -> Result<ProcessingOutcome, ProcessingError> {
        self.process(event).await
    }
}
