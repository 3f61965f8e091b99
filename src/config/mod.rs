//! Application configuration.
//!
//! Loaded once at startup from YAML files and environment variables, then
//! validated for the binary that is starting. Nothing reads the environment
//! after [`Config::load`] returns.

use std::path::PathBuf;

use serde::Deserialize;
use tracing::debug;

use crate::capability::Table;
use crate::dlq::{DlqConfig, DlqType};
use crate::feed::FeedConfig;
use crate::storage::{StorageConfig, StorageType};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "FINANCE_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "FINANCE";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "FINANCE_LOG";
/// Environment variable selecting the log format (`json` or text).
pub const LOG_FORMAT_ENV_VAR: &str = "FINANCE_LOG_FORMAT";

/// Environment variable names set by the serverless deployment.
pub mod legacy {
    pub const SMS_TABLE: &str = "smsTableName";
    pub const SMS_TABLE_STREAM_ARN: &str = "smsTableStreamArn";
    pub const TRANSACTION_TABLE: &str = "transactionTableName";
    pub const CATEGORIES_TABLE: &str = "categoriesMappingTableName";
    pub const PERIODS_TABLE: &str = "monthsPeriodTableName";
    pub const AUTHORIZATION_HEADER: &str = "AUTHORIZATION_HEADER";
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    Missing(String),

    #[error("Invalid configuration '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Failed to load configuration: {0}")]
    Load(String),
}

impl From<::config::ConfigError> for ConfigError {
    fn from(err: ::config::ConfigError) -> Self {
        ConfigError::Load(err.to_string())
    }
}

/// The binary a configuration is validated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    /// Change feed plus SMS processor.
    Processor,
    /// HTTP API.
    Api,
    /// Both, in one process, on in-memory storage by default.
    Standalone,
}

/// Physical table names.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TablesConfig {
    pub sms: Option<String>,
    pub transactions: Option<String>,
    pub categories: Option<String>,
    pub periods: Option<String>,
    /// Stream ARN of the sms table. Looked up from the table when unset.
    pub sms_stream_arn: Option<String>,
}

impl TablesConfig {
    pub fn name(&self, table: Table) -> Option<&str> {
        let name = match table {
            Table::Sms => &self.sms,
            Table::Transactions => &self.transactions,
            Table::Categories => &self.categories,
            Table::Periods => &self.periods,
        };
        name.as_deref().filter(|n| !n.trim().is_empty())
    }

    pub fn require(&self, table: Table) -> Result<&str, ConfigError> {
        self.name(table)
            .ok_or_else(|| ConfigError::Missing(format!("tables.{}", table)))
    }
}

/// HTTP API configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Shared secret expected in the `Authorization` header.
    pub authorization_header: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            authorization_header: None,
        }
    }
}

impl ApiConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Standalone mode configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StandaloneConfig {
    /// JSON-lines file appended to the sms table at startup.
    pub seed_path: Option<PathBuf>,
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tables: TablesConfig,
    pub api: ApiConfig,
    pub feed: FeedConfig,
    pub storage: StorageConfig,
    pub dlq: DlqConfig,
    pub standalone: StandaloneConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Sources, later overriding earlier:
    /// 1. `config.yaml` in the current directory (if it exists)
    /// 2. File named by `path` (if provided)
    /// 3. File named by `FINANCE_CONFIG` (if set)
    /// 4. `FINANCE__*` environment variables, `__` separating sections
    /// 5. Legacy deployment variables (`smsTableName`, `AUTHORIZATION_HEADER`, ...)
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Config = config.try_deserialize()?;
        config.apply_legacy_env_overrides();
        Ok(config)
    }

    /// Apply the deployment's historical environment variable names.
    fn apply_legacy_env_overrides(&mut self) {
        let overrides = [
            (legacy::SMS_TABLE, &mut self.tables.sms),
            (legacy::SMS_TABLE_STREAM_ARN, &mut self.tables.sms_stream_arn),
            (legacy::TRANSACTION_TABLE, &mut self.tables.transactions),
            (legacy::CATEGORIES_TABLE, &mut self.tables.categories),
            (legacy::PERIODS_TABLE, &mut self.tables.periods),
            (legacy::AUTHORIZATION_HEADER, &mut self.api.authorization_header),
        ];

        for (var, target) in overrides {
            if let Ok(value) = std::env::var(var) {
                debug!(var, "Applying legacy environment override");
                *target = Some(value);
            }
        }
    }

    /// Check that everything `component` needs is present and sane.
    pub fn validate(&self, component: Component) -> Result<(), ConfigError> {
        let tables_required = match component {
            Component::Processor => &[Table::Sms, Table::Transactions, Table::Categories][..],
            Component::Api => &[Table::Transactions, Table::Categories, Table::Periods][..],
            Component::Standalone if self.storage.storage_type == StorageType::Dynamo => {
                &Table::ALL[..]
            }
            Component::Standalone => &[][..],
        };
        for table in tables_required {
            self.tables.require(*table)?;
        }

        if matches!(component, Component::Api | Component::Standalone) {
            let secret = self.api.authorization_header.as_deref().unwrap_or("");
            if secret.is_empty() {
                return Err(ConfigError::Missing("api.authorization_header".to_string()));
            }
        }

        if matches!(component, Component::Processor | Component::Standalone) {
            self.feed.validate()?;
        }

        if self.dlq.dlq_type == DlqType::Sqs && self.dlq.queue_name.is_none() {
            return Err(ConfigError::Missing("dlq.queue_name".to_string()));
        }

        if self.storage.op_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "storage.op_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}
