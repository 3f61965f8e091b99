//! Change feed configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::config::ConfigError;

/// Where a newly attached feed starts reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartingPosition {
    /// Only changes committed after the feed attached.
    #[default]
    Latest,
    /// The oldest change the stream still retains.
    TrimHorizon,
}

/// Redelivery policy settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total deliveries per event, the first one included.
    pub max_attempts: u32,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            min_delay_ms: 100,
            max_delay_ms: 2_000,
            jitter: true,
        }
    }
}

/// Change feed configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub starting_position: StartingPosition,
    /// Events per handler invocation. Only 1 is supported.
    pub batch_size: u32,
    /// Records taken from the source per poll.
    pub poll_limit: usize,
    /// Concurrent delivery lanes.
    pub lanes: usize,
    /// Sleep between polls that returned nothing.
    pub poll_interval_ms: u64,
    /// Upper bound for a single handler invocation.
    pub invocation_timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            starting_position: StartingPosition::Latest,
            batch_size: 1,
            poll_limit: 100,
            lanes: 4,
            poll_interval_ms: 500,
            invocation_timeout_secs: 30,
            retry: RetryConfig::default(),
        }
    }
}

impl FeedConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.invocation_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };

        if self.batch_size != 1 {
            return invalid("feed.batch_size", "only a batch size of 1 is supported");
        }
        if self.retry.max_attempts == 0 {
            return invalid("feed.retry.max_attempts", "must be at least 1");
        }
        if self.lanes == 0 {
            return invalid("feed.lanes", "must be at least 1");
        }
        if self.poll_limit == 0 {
            return invalid("feed.poll_limit", "must be at least 1");
        }
        if self.invocation_timeout_secs == 0 {
            return invalid("feed.invocation_timeout_secs", "must be greater than zero");
        }
        if self.retry.min_delay_ms > self.retry.max_delay_ms {
            return invalid(
                "feed.retry.min_delay_ms",
                "must not exceed feed.retry.max_delay_ms",
            );
        }
        Ok(())
    }
}
