//! Record store: the SMS, transactions, category mapping and periods tables.
//!
//! Each table is an object-safe trait so the in-memory and DynamoDB backends
//! are interchangeable. Handlers never hold the raw [`Stores`]; they go through
//! [`ScopedStores`], which enforces their capability grants and bounds every
//! call with a timeout.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::capability::Capability;
use crate::config::TablesConfig;

mod category_store;
mod config;
pub mod memory;
mod period_store;
mod scoped;
mod source_store;
mod transaction_store;

#[cfg(feature = "dynamo")]
pub mod dynamo;

pub use category_store::CategoryStore;
pub use config::{StorageConfig, StorageType};
pub use memory::MemoryTables;
pub use period_store::PeriodStore;
pub use scoped::ScopedStores;
pub use source_store::SourceStore;
pub use transaction_store::{InsertOutcome, TransactionStore};

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store operation '{operation}' timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Handler '{holder}' lacks capability {capability}")]
    Forbidden {
        holder: &'static str,
        capability: Capability,
    },

    #[error("Stored item could not be decoded: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether retrying the same operation later might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout { .. })
    }
}

/// Handles to all tables.
#[derive(Clone)]
pub struct Stores {
    pub sms: Arc<dyn SourceStore>,
    pub transactions: Arc<dyn TransactionStore>,
    pub categories: Arc<dyn CategoryStore>,
    pub periods: Arc<dyn PeriodStore>,
}

/// The concrete backend behind [`Stores`].
///
/// The change feed needs the concrete backend to attach to the SMS table's
/// stream.
#[derive(Clone)]
pub enum Backend {
    Memory(Arc<MemoryTables>),
    #[cfg(feature = "dynamo")]
    Dynamo(dynamo::DynamoTables),
}

/// Initialized storage.
#[derive(Clone)]
pub struct Storage {
    pub stores: Stores,
    pub backend: Backend,
    pub op_timeout: Duration,
}

impl Storage {
    /// In-memory storage, used by standalone mode and tests.
    pub fn memory(op_timeout: Duration) -> Self {
        let tables = Arc::new(MemoryTables::new());
        Self {
            stores: tables.stores(),
            backend: Backend::Memory(tables),
            op_timeout,
        }
    }
}

/// Initialize storage based on configuration.
pub async fn init_storage(
    config: &StorageConfig,
    tables: &TablesConfig,
) -> std::result::Result<Storage, Box<dyn std::error::Error + Send + Sync>> {
    info!(storage_type = %config.storage_type, "Initializing storage");

    match config.storage_type {
        StorageType::Memory => Ok(Storage::memory(config.op_timeout())),
        #[cfg(feature = "dynamo")]
        StorageType::Dynamo => {
            let tables = dynamo::DynamoTables::connect(config, tables).await;
            Ok(Storage {
                stores: tables.stores(),
                backend: Backend::Dynamo(tables),
                op_timeout: config.op_timeout(),
            })
        }
        #[cfg(not(feature = "dynamo"))]
        StorageType::Dynamo => {
            let _ = tables;
            tracing::error!("DynamoDB storage requested but 'dynamo' feature is not enabled");
            Err("DynamoDB feature not enabled".into())
        }
    }
}
