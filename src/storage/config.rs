//! Storage configuration types.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

/// Storage type discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Memory,
    Dynamo,
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageType::Memory => f.write_str("memory"),
            StorageType::Dynamo => f.write_str("dynamo"),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage type discriminator.
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    /// AWS region. Uses the default provider chain if not set.
    pub region: Option<String>,
    /// Custom endpoint URL (DynamoDB Local, LocalStack).
    pub endpoint_url: Option<String>,
    /// Upper bound for a single store call before it fails as unavailable.
    pub op_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Memory,
            region: None,
            endpoint_url: None,
            op_timeout_ms: 5_000,
        }
    }
}

impl StorageConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}
