//! Change feed over the sms table.
//!
//! Polls a [`FeedSource`] for newly committed source records and delivers each
//! one to an [`EventHandler`] as a [`ChangeEvent`].
//!
//! ## Delivery
//!
//! - At least once. A failed delivery is retried up to the policy's
//!   `max_attempts` in total, then the event goes to the dead letter sink.
//! - Records are split into lanes by a stable hash of the source id. Lanes
//!   run concurrently; inside a lane events are delivered one at a time in
//!   stream order, so a key never has two deliveries in flight.
//! - A failed dead letter deposit is logged and the lane moves on.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

use crate::dlq::{deposit_best_effort, DeadLetterEntry, DeadLetterSink, META_ERROR_KIND};
use crate::model::{ChangeEvent, SequenceToken, SourceRecord};
use crate::storage::Backend;

mod config;
mod memory;
mod retry;
pub mod shards;

#[cfg(feature = "dynamo")]
pub mod dynamo_stream;

#[cfg(test)]
mod tests;

pub use config::{FeedConfig, RetryConfig, StartingPosition};
pub use memory::MemoryFeedSource;
pub use retry::{delivery_backoff, RetryPolicy, Retryable};

/// Failure kind recorded when a delivery exceeds the invocation timeout.
pub const TIMEOUT_KIND: &str = "invocation_timeout";

/// Errors raised while reading the stream.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("Feed source unavailable: {0}")]
    Source(String),

    #[error("Stream not found: {0}")]
    StreamNotFound(String),
}

/// A committed mutation of the sms table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    pub record: SourceRecord,
    pub sequence_token: SequenceToken,
}

/// Where change records come from.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Next records in commit order, at most `max`. Advances the cursor.
    async fn poll(&self, max: usize) -> Result<Vec<StreamRecord>, FeedError>;
}

/// Consumer of change events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    type Outcome: fmt::Debug + Send;
    type Error: Retryable + fmt::Display + Send;

    async fn handle(&self, event: &ChangeEvent) -> Result<Self::Outcome, Self::Error>;
}

/// Counts from one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpReport {
    /// Handler invocations, redeliveries included.
    pub delivered: usize,
    /// Events the handler accepted.
    pub succeeded: usize,
    /// Events handed to the dead letter sink.
    pub dead_lettered: usize,
}

impl PumpReport {
    /// Whether the cycle saw no records at all.
    pub fn is_idle(&self) -> bool {
        self.delivered == 0
    }
}

impl AddAssign for PumpReport {
    fn add_assign(&mut self, other: Self) {
        self.delivered += other.delivered;
        self.succeeded += other.succeeded;
        self.dead_lettered += other.dead_lettered;
    }
}

/// Attach a feed source to the sms table of `backend`.
pub async fn attach_source(
    backend: &Backend,
    position: StartingPosition,
) -> Result<Arc<dyn FeedSource>, FeedError> {
    match backend {
        Backend::Memory(tables) => Ok(Arc::new(
            MemoryFeedSource::attach(tables.sms.clone(), position).await,
        )),
        #[cfg(feature = "dynamo")]
        Backend::Dynamo(tables) => Ok(Arc::new(
            dynamo_stream::DynamoStreamSource::attach(tables, position).await?,
        )),
    }
}

struct DeliveryFailure {
    reason: String,
    kind: &'static str,
    retryable: bool,
}

/// Lane index for a source id. Stable for the life of the process.
pub fn lane_for(source_id: &str, lanes: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    source_id.hash(&mut hasher);
    (hasher.finish() % lanes.max(1) as u64) as usize
}

/// Delivers records from a source to a handler under a retry policy.
pub struct ChangeFeed<H> {
    source: Arc<dyn FeedSource>,
    handler: Arc<H>,
    policy: RetryPolicy,
    lanes: usize,
    poll_limit: usize,
    poll_interval: Duration,
    invocation_timeout: Duration,
}

impl<H: EventHandler> ChangeFeed<H> {
    pub fn new(source: Arc<dyn FeedSource>, handler: Arc<H>, policy: RetryPolicy) -> Self {
        let defaults = FeedConfig::default();
        Self {
            source,
            handler,
            policy,
            lanes: defaults.lanes,
            poll_limit: defaults.poll_limit,
            poll_interval: defaults.poll_interval(),
            invocation_timeout: defaults.invocation_timeout(),
        }
    }

    /// Build a feed from configuration, dead-lettering into `sink`.
    pub fn from_config(
        source: Arc<dyn FeedSource>,
        handler: Arc<H>,
        sink: Arc<dyn DeadLetterSink>,
        config: &FeedConfig,
    ) -> Self {
        Self::new(source, handler, RetryPolicy::from_config(&config.retry, sink))
            .with_lanes(config.lanes)
            .with_poll_limit(config.poll_limit)
            .with_poll_interval(config.poll_interval())
            .with_invocation_timeout(config.invocation_timeout())
    }

    pub fn with_lanes(mut self, lanes: usize) -> Self {
        self.lanes = lanes.max(1);
        self
    }

    pub fn with_poll_limit(mut self, poll_limit: usize) -> Self {
        self.poll_limit = poll_limit.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_invocation_timeout(mut self, invocation_timeout: Duration) -> Self {
        self.invocation_timeout = invocation_timeout;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run one poll cycle and deliver everything it returned.
    pub async fn pump(&self) -> Result<PumpReport, FeedError> {
        let records = self.source.poll(self.poll_limit).await?;
        if records.is_empty() {
            return Ok(PumpReport::default());
        }

        debug!(records = records.len(), lanes = self.lanes, "Polled change records");

        let mut lanes: Vec<Vec<StreamRecord>> = vec![Vec::new(); self.lanes];
        for record in records {
            lanes[lane_for(&record.record.id, self.lanes)].push(record);
        }

        let reports = join_all(
            lanes
                .into_iter()
                .enumerate()
                .filter(|(_, lane)| !lane.is_empty())
                .map(|(index, lane)| self.drain_lane(index, lane)),
        )
        .await;

        let mut total = PumpReport::default();
        for report in reports {
            total += report;
        }
        Ok(total)
    }

    /// Poll until `shutdown` flips to `true`.
    ///
    /// Sleeps for the poll interval whenever a cycle came back empty or the
    /// source failed. An in-flight cycle always finishes before returning.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            lanes = self.lanes,
            poll_limit = self.poll_limit,
            max_attempts = self.policy.max_attempts(),
            dlq_configured = self.policy.sink().is_configured(),
            "Change feed started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.pump().await {
                Ok(report) => {
                    if !report.is_idle() {
                        info!(
                            delivered = report.delivered,
                            succeeded = report.succeeded,
                            dead_lettered = report.dead_lettered,
                            "Change feed cycle complete"
                        );
                    }
                    report.is_idle()
                }
                Err(e) => {
                    error!(error = %e, "Failed to poll change feed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        info!("Change feed stopped");
    }

    async fn drain_lane(&self, index: usize, lane: Vec<StreamRecord>) -> PumpReport {
        let mut report = PumpReport::default();
        for record in lane {
            let span = tracing::info_span!(
                "feed.deliver",
                lane = index,
                source_id = %record.record.id,
                sequence = %record.sequence_token
            );
            report += self.deliver(record).instrument(span).await;
        }
        report
    }

    /// Deliver one record until it succeeds, fails permanently, or runs out
    /// of attempts.
    async fn deliver(&self, record: StreamRecord) -> PumpReport {
        let mut report = PumpReport::default();
        let mut delays = self.policy.delays();
        let mut event = ChangeEvent {
            record: record.record,
            sequence_token: record.sequence_token,
            delivery_attempt: 1,
        };

        loop {
            report.delivered += 1;

            let failure =
                match tokio::time::timeout(self.invocation_timeout, self.handler.handle(&event))
                    .await
                {
                    Ok(Ok(outcome)) => {
                        debug!(attempt = event.delivery_attempt, ?outcome, "Event handled");
                        report.succeeded += 1;
                        return report;
                    }
                    Ok(Err(err)) => DeliveryFailure {
                        reason: err.to_string(),
                        kind: err.kind(),
                        retryable: err.is_retryable(),
                    },
                    Err(_) => DeliveryFailure {
                        reason: format!(
                            "invocation timed out after {:?}",
                            self.invocation_timeout
                        ),
                        kind: TIMEOUT_KIND,
                        retryable: true,
                    },
                };

            if self
                .policy
                .should_retry(failure.retryable, event.delivery_attempt)
            {
                let delay = delays.next().unwrap_or(Duration::ZERO);
                warn!(
                    attempt = event.delivery_attempt,
                    max_attempts = self.policy.max_attempts(),
                    kind = failure.kind,
                    error = %failure.reason,
                    delay_ms = delay.as_millis() as u64,
                    "Delivery failed, retrying"
                );
                tokio::time::sleep(delay).await;
                event.delivery_attempt += 1;
                continue;
            }

            warn!(
                attempt = event.delivery_attempt,
                kind = failure.kind,
                retryable = failure.retryable,
                error = %failure.reason,
                "Delivery failed, dead-lettering event"
            );

            let entry =
                DeadLetterEntry::from_failed_event(&event, failure.reason, event.delivery_attempt)
                    .with_metadata(META_ERROR_KIND, failure.kind);
            deposit_best_effort(self.policy.sink(), entry).await;
            report.dead_lettered += 1;
            return report;
        }
    }
}
