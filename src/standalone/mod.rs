//! Processor and API wired into one process.
//!
//! Storage follows `storage.type`. With memory tables the feed always starts at
//! the trim horizon so seeded records are processed; against DynamoDB it uses
//! the configured starting position. Dead letters go to a channel the caller
//! drains.

use std::sync::Arc;

use axum::Router;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;

use crate::api::{self, ApiState};
use crate::auth::Authorizer;
use crate::config::{Component, Config, ConfigError};
use crate::dlq::{ChannelDeadLetterSink, DeadLetterEntry};
use crate::feed::{attach_source, ChangeFeed, FeedError, StartingPosition};
use crate::processor::SmsProcessor;
use crate::storage::memory::{seed_source_table, SeedError};
use crate::storage::{init_storage, Backend, Storage};


/// Errors raised while assembling standalone mode.
#[derive(Debug, thiserror::Error)]
pub enum StandaloneError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Storage initialization failed: {0}")]
    Storage(String),

    #[error(transparent)]
    Seed(#[from] SeedError),

    #[error(transparent)]
    Feed(#[from] FeedError),
}

/// Everything the standalone binary runs.
pub struct Standalone {
    pub storage: Storage,
    pub feed: ChangeFeed<SmsProcessor>,
    pub router: Router,
    pub dead_letters: UnboundedReceiver<DeadLetterEntry>,
}

/// Where the feed starts for `backend`.
#[cfg_attr(not(feature = "dynamo"), allow(unused_variables))]
pub fn starting_position(backend: &Backend, configured: StartingPosition) -> StartingPosition {
    match backend {
        Backend::Memory(_) => StartingPosition::TrimHorizon,
        #[cfg(feature = "dynamo")]
        Backend::Dynamo(_) => configured,
    }
}

/// Validate `config`, initialize storage, seed it and wire feed and router.
pub async fn build(config: &Config) -> Result<Standalone, StandaloneError> {
    config.validate(Component::Standalone)?;
    let secret = config
        .api
        .authorization_header
        .clone()
        .ok_or_else(|| ConfigError::Missing("api.authorization_header".to_string()))?;

    let storage = init_storage(&config.storage, &config.tables)
        .await
        .map_err(|e| StandaloneError::Storage(e.to_string()))?;

    if let Some(ref path) = config.standalone.seed_path {
        seed_source_table(storage.stores.sms.as_ref(), path).await?;
    }

    let position = starting_position(&storage.backend, config.feed.starting_position);
    info!(storage_type = %config.storage.storage_type, ?position, "Wiring standalone mode");

    let source = attach_source(&storage.backend, position).await?;
    let (sink, dead_letters) = ChannelDeadLetterSink::new();
    let processor = Arc::new(SmsProcessor::new(storage.stores.clone(), storage.op_timeout));
    let feed = ChangeFeed::from_config(source, processor, Arc::new(sink), &config.feed);

    let router = api::router(
        ApiState::new(storage.stores.clone(), storage.op_timeout),
        Arc::new(Authorizer::new(secret)),
        config.feed.invocation_timeout(),
    );

    Ok(Standalone {
        storage,
        feed,
        router,
        dead_letters,
    })
}
