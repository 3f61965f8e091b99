//! finance-processor: stream-triggered SMS processor
//!
//! Follows the sms table's change feed and turns every inserted SMS into a
//! transaction record. Deliveries that keep failing end up in the configured
//! dead letter sink.
//!
//! ## Configuration
//! ```yaml
//! tables:
//!   sms: Sms
//!   transactions: Transactions
//!   categories: TransactionsCategoryMapping
//!
//! storage:
//!   type: dynamo
//!
//! feed:
//!   starting_position: latest
//!   retry:
//!     max_attempts: 2
//!
//! dlq:
//!   type: sqs
//!   queue_name: SMSDeadLetterQueue
//! ```

use std::sync::Arc;

use tracing::{error, info};

use finance_pipeline::config::{Component, Config};
use finance_pipeline::dlq::create_sink;
use finance_pipeline::feed::{attach_source, ChangeFeed};
use finance_pipeline::processor::SmsProcessor;
use finance_pipeline::storage::init_storage;
use finance_pipeline::utils::bootstrap::{connect_with_retry, init_tracing, shutdown_channel};

/// Attempts at reaching the dead letter queue before giving up.
const DLQ_CONNECT_ATTEMPTS: u32 = 10;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(None).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    config.validate(Component::Processor).map_err(|e| {
        error!("Invalid configuration: {}", e);
        e
    })?;

    info!(
        storage = %config.storage.storage_type,
        starting_position = ?config.feed.starting_position,
        max_attempts = config.feed.retry.max_attempts,
        "Starting finance-processor"
    );

    let storage = init_storage(&config.storage, &config.tables)
        .await
        .map_err(|e| -> Box<dyn std::error::Error> { e })?;

    let dlq = &config.dlq;
    let sink = connect_with_retry("dead letter queue", DLQ_CONNECT_ATTEMPTS, move || {
        create_sink(dlq)
    })
    .await?;

    let source = attach_source(&storage.backend, config.feed.starting_position).await?;
    let processor = Arc::new(SmsProcessor::new(storage.stores.clone(), storage.op_timeout));
    let feed = ChangeFeed::from_config(source, processor, sink, &config.feed);

    feed.run(shutdown_channel()).await;

    info!("finance-processor stopped");
    Ok(())
}
