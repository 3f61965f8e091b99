//! Shared utilities for integration tests.
//!
//! Builds the pipeline against in-memory tables with a fast retry policy and
//! a channel dead letter sink.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use backon::ExponentialBuilder;
use tokio::sync::mpsc::UnboundedReceiver;

use finance_pipeline::dlq::{ChannelDeadLetterSink, DeadLetterEntry};
use finance_pipeline::feed::{ChangeFeed, MemoryFeedSource, RetryPolicy, StartingPosition};
use finance_pipeline::model::SourceRecord;
use finance_pipeline::processor::SmsProcessor;
use finance_pipeline::storage::{MemoryTables, SourceStore};

/// Store call timeout used throughout the tests.
pub const OP_TIMEOUT: Duration = Duration::from_secs(1);

/// Secret the test router is configured with.
pub const SECRET: &str = "test-secret";

pub struct Pipeline {
    pub tables: Arc<MemoryTables>,
    pub feed: ChangeFeed<SmsProcessor>,
    pub dead_letters: UnboundedReceiver<DeadLetterEntry>,
}

/// In-memory pipeline reading the sms table from the trim horizon.
pub async fn pipeline() -> Pipeline {
    let tables = Arc::new(MemoryTables::new());
    let source = Arc::new(
        MemoryFeedSource::attach(tables.sms.clone(), StartingPosition::TrimHorizon).await,
    );
    let (sink, dead_letters) = ChannelDeadLetterSink::new();
    let policy = RetryPolicy::new(2, Arc::new(sink)).with_backoff(
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(2)),
    );
    let processor = Arc::new(SmsProcessor::new(tables.stores(), OP_TIMEOUT));
    let feed = ChangeFeed::new(source, processor, policy);

    Pipeline {
        tables,
        feed,
        dead_letters,
    }
}

/// Append an SMS to the sms table.
pub async fn send_sms(tables: &MemoryTables, id: &str, description: &str, amount: &str) {
    let payload = serde_json::json!({ "description": description, "amount": amount });
    tables
        .sms
        .append(SourceRecord::new(id, payload.to_string().into_bytes()))
        .await
        .unwrap();
}
