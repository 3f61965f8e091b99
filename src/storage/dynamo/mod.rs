//! DynamoDB tables.
//!
//! Item layouts:
//! - sms: `id` (S, key), `body` (S, raw payload), `insertedAt` (S)
//! - transactions: `id` (S, key), `sourceId`, `description`, `amount` (N),
//!   `category` (S, absent when unset), `createdAt`
//! - categories: `description` (S, key), `category`, `updatedAt`
//! - periods: `month` (S, key), `data` (S, JSON object), `updatedAt`

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, Utc};
use tracing::info;

use super::{Result, StoreError, StorageConfig, Stores};
use crate::capability::Table;
use crate::config::TablesConfig;

mod category_store;
mod period_store;
mod source_store;
mod transaction_store;

pub use category_store::DynamoCategoryStore;
pub use period_store::DynamoPeriodStore;
pub use source_store::DynamoSourceStore;
pub use transaction_store::DynamoTransactionStore;

/// A single DynamoDB item.
pub(crate) type Item = HashMap<String, AttributeValue>;

/// Table name used when none is configured.
pub fn default_table_name(table: Table) -> &'static str {
    match table {
        Table::Sms => "Sms",
        Table::Transactions => "Transactions",
        Table::Categories => "TransactionsCategoryMapping",
        Table::Periods => "MonthsPeriod",
    }
}

/// Connected DynamoDB tables.
#[derive(Clone)]
pub struct DynamoTables {
    sdk_config: SdkConfig,
    stream_arn: Option<String>,
    pub sms: Arc<DynamoSourceStore>,
    pub transactions: Arc<DynamoTransactionStore>,
    pub categories: Arc<DynamoCategoryStore>,
    pub periods: Arc<DynamoPeriodStore>,
}

impl DynamoTables {
    /// Load AWS configuration and create one client shared by all tables.
    pub async fn connect(config: &StorageConfig, tables: &TablesConfig) -> Self {
        let mut builder = aws_config::defaults(BehaviorVersion::latest());

        if let Some(ref region) = config.region {
            builder = builder.region(aws_config::Region::new(region.clone()));
        }

        if let Some(ref endpoint) = config.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        let sdk_config = builder.load().await;
        let client = Client::new(&sdk_config);

        let name = |table: Table| {
            tables
                .name(table)
                .unwrap_or_else(|| default_table_name(table))
                .to_string()
        };

        info!(
            region = ?config.region,
            endpoint = ?config.endpoint_url,
            sms = %name(Table::Sms),
            transactions = %name(Table::Transactions),
            categories = %name(Table::Categories),
            periods = %name(Table::Periods),
            "Connected to DynamoDB"
        );

        Self {
            sms: Arc::new(DynamoSourceStore::new(client.clone(), name(Table::Sms))),
            transactions: Arc::new(DynamoTransactionStore::new(
                client.clone(),
                name(Table::Transactions),
            )),
            categories: Arc::new(DynamoCategoryStore::new(
                client.clone(),
                name(Table::Categories),
            )),
            periods: Arc::new(DynamoPeriodStore::new(client, name(Table::Periods))),
            stream_arn: tables.sms_stream_arn.clone(),
            sdk_config,
        }
    }

    pub fn stores(&self) -> Stores {
        Stores {
            sms: self.sms.clone(),
            transactions: self.transactions.clone(),
            categories: self.categories.clone(),
            periods: self.periods.clone(),
        }
    }

    /// AWS configuration the tables were connected with.
    pub fn sdk_config(&self) -> &SdkConfig {
        &self.sdk_config
    }

    /// Configured stream ARN of the sms table, if any.
    pub fn stream_arn(&self) -> Option<&str> {
        self.stream_arn.as_deref()
    }

    pub fn sms_table_name(&self) -> &str {
        self.sms.table_name()
    }
}

pub(crate) fn backend_error<E>(operation: &str, err: E) -> StoreError
where
    E: std::error::Error,
{
    StoreError::Unavailable(format!("{}: {}", operation, DisplayErrorContext(err)))
}

pub(crate) fn string_attr(item: &Item, name: &str) -> Result<String> {
    match item.get(name) {
        Some(AttributeValue::S(value)) => Ok(value.clone()),
        Some(_) => Err(StoreError::Serialization(format!(
            "attribute '{}' is not a string",
            name
        ))),
        None => Err(StoreError::Serialization(format!(
            "missing attribute '{}'",
            name
        ))),
    }
}

pub(crate) fn optional_string_attr(item: &Item, name: &str) -> Result<Option<String>> {
    match item.get(name) {
        None | Some(AttributeValue::Null(_)) => Ok(None),
        Some(_) => string_attr(item, name).map(Some),
    }
}

pub(crate) fn number_attr<T: FromStr>(item: &Item, name: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match item.get(name) {
        Some(AttributeValue::N(value)) => value.parse().map_err(|e: T::Err| {
            StoreError::Serialization(format!("attribute '{}': {}", name, e))
        }),
        _ => Err(StoreError::Serialization(format!(
            "missing numeric attribute '{}'",
            name
        ))),
    }
}

pub(crate) fn timestamp_attr(item: &Item, name: &str) -> Result<DateTime<Utc>> {
    let raw = string_attr(item, name)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("attribute '{}': {}", name, e)))
}

pub(crate) fn timestamp_value(ts: &DateTime<Utc>) -> AttributeValue {
    AttributeValue::S(ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
}
