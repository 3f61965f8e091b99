//! Redelivery policy: backoff between attempts and where exhausted events go.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};

use super::config::RetryConfig;
use crate::dlq::DeadLetterSink;

/// Classifies handler failures for the feed.
pub trait Retryable {
    /// Whether redelivering the same event might succeed.
    fn is_retryable(&self) -> bool;

    /// Short machine-readable failure class, recorded on dead letters.
    fn kind(&self) -> &'static str;
}

/// Standard backoff between redeliveries.
///
/// - Min delay: 100ms
/// - Max delay: 2s
/// - Jitter enabled
pub fn delivery_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(2))
        .with_jitter()
}

/// How many times an event is delivered and what happens after the last failure.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: ExponentialBuilder,
    on_exhaustion: Arc<dyn DeadLetterSink>,
}

impl RetryPolicy {
    /// `max_attempts` counts every delivery, the first one included.
    pub fn new(max_attempts: u32, on_exhaustion: Arc<dyn DeadLetterSink>) -> Self {
        let max_attempts = max_attempts.max(1);
        Self {
            max_attempts,
            backoff: delivery_backoff().with_max_times((max_attempts - 1) as usize),
            on_exhaustion,
        }
    }

    pub fn from_config(config: &RetryConfig, on_exhaustion: Arc<dyn DeadLetterSink>) -> Self {
        let mut backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(config.min_delay_ms))
            .with_max_delay(Duration::from_millis(config.max_delay_ms));
        if config.jitter {
            backoff = backoff.with_jitter();
        }
        Self::new(config.max_attempts, on_exhaustion).with_backoff(backoff)
    }

    /// Replace the backoff, keeping the attempt limit.
    pub fn with_backoff(mut self, backoff: ExponentialBuilder) -> Self {
        self.backoff = backoff.with_max_times((self.max_attempts - 1) as usize);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn sink(&self) -> &dyn DeadLetterSink {
        self.on_exhaustion.as_ref()
    }

    /// Fresh delay sequence for one event.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        self.backoff.build()
    }

    /// Whether a failure on `attempt` should be redelivered.
    pub fn should_retry(&self, retryable: bool, attempt: u32) -> bool {
        retryable && attempt < self.max_attempts
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("sink_configured", &self.on_exhaustion.is_configured())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dlq::NoopDeadLetterSink;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Arc::new(NoopDeadLetterSink))
    }

    #[test]
    fn test_two_attempts_allows_one_redelivery() {
        let policy = policy(2);
        assert!(policy.should_retry(true, 1));
        assert!(!policy.should_retry(true, 2));
        assert!(!policy.should_retry(false, 1));
    }

    #[test]
    fn test_delays_bounded_by_attempts() {
        let three = policy(3);
        assert_eq!(three.delays().count(), 2);

        let single = policy(1).with_backoff(ExponentialBuilder::default());
        assert_eq!(single.delays().count(), 0);
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        assert_eq!(policy(0).max_attempts(), 1);
    }

    #[test]
    fn test_from_config_respects_max_delay() {
        let config = RetryConfig {
            max_attempts: 4,
            min_delay_ms: 5,
            max_delay_ms: 10,
            jitter: false,
        };
        let policy = RetryPolicy::from_config(&config, Arc::new(NoopDeadLetterSink));
        let delays: Vec<_> = policy.delays().collect();
        assert_eq!(delays.len(), 3);
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(10)));
    }
}
