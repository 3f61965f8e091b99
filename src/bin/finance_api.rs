//! finance-api: authorized HTTP API over the finance tables
//!
//! Routes:
//! - `GET /transactions`
//! - `PUT /transactions/category`
//! - `GET /months/{month}`
//! - `POST /months`
//!
//! Every route requires the configured `Authorization` header.

use std::sync::Arc;

use tracing::{error, info};

use finance_pipeline::api::{self, ApiState};
use finance_pipeline::auth::Authorizer;
use finance_pipeline::config::{Component, Config, ConfigError};
use finance_pipeline::storage::init_storage;
use finance_pipeline::utils::bootstrap::{init_tracing, shutdown_signal};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(None).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    config.validate(Component::Api).map_err(|e| {
        error!("Invalid configuration: {}", e);
        e
    })?;

    let secret = config
        .api
        .authorization_header
        .clone()
        .ok_or_else(|| ConfigError::Missing("api.authorization_header".to_string()))?;

    info!(
        storage = %config.storage.storage_type,
        address = %config.api.bind_address(),
        "Starting finance-api"
    );

    let storage = init_storage(&config.storage, &config.tables)
        .await
        .map_err(|e| -> Box<dyn std::error::Error> { e })?;

    let router = api::router(
        ApiState::new(storage.stores.clone(), storage.op_timeout),
        Arc::new(Authorizer::new(secret)),
        config.feed.invocation_timeout(),
    );

    api::serve(&config.api, router, shutdown_signal()).await?;
    Ok(())
}
