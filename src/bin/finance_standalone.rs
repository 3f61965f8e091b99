//! finance-standalone: processor and API in one process
//!
//! Runs against in-memory tables for local development, or against DynamoDB
//! when `storage.type` is `dynamo`. With memory tables the change feed starts
//! at the trim horizon so seeded SMS records are processed. Dead letters are
//! written to the log.
//!
//! ## Configuration
//! ```yaml
//! api:
//!   port: 8080
//!   authorization_header: local-secret
//!
//! standalone:
//!   seed_path: ./sms.jsonl
//! ```

use tracing::{error, info, warn};

use finance_pipeline::api;
use finance_pipeline::config::Config;
use finance_pipeline::standalone::{self, Standalone};
use finance_pipeline::utils::bootstrap::{init_tracing, shutdown_channel, wait_for_shutdown};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(None).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(address = %config.api.bind_address(), "Starting finance-standalone");

    let Standalone {
        feed,
        router,
        mut dead_letters,
        ..
    } = standalone::build(&config).await.map_err(|e| {
        error!("Failed to start standalone mode: {}", e);
        e
    })?;

    tokio::spawn(async move {
        while let Some(entry) = dead_letters.recv().await {
            warn!(
                source_id = entry.source_id().unwrap_or("unknown"),
                attempts = entry.attempts,
                reason = %entry.failure_reason,
                "Dead letter"
            );
        }
    });

    let shutdown = shutdown_channel();
    let feed_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { feed.run(shutdown).await })
    };

    api::serve(&config.api, router, wait_for_shutdown(shutdown)).await?;

    if let Err(e) = feed_task.await {
        error!("Change feed task failed: {}", e);
    }

    info!("finance-standalone stopped");
    Ok(())
}
