use std::collections::{HashMap, VecDeque};
use std::fmt;

use backon::ExponentialBuilder;
use tokio::sync::Mutex;

use super::*;
use crate::dlq::ChannelDeadLetterSink;
use crate::storage::memory::MemorySourceStore;
use crate::storage::SourceStore;

// ============================================================================
// Test Handler
// ============================================================================

#[derive(Debug)]
struct ScriptedError {
    retryable: bool,
}

impl fmt::Display for ScriptedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scripted failure (retryable: {})", self.retryable)
    }
}

impl Retryable for ScriptedError {
    fn is_retryable(&self) -> bool {
        self.retryable
    }

    fn kind(&self) -> &'static str {
        if self.retryable {
            "transient"
        } else {
            "permanent"
        }
    }
}

enum Step {
    Fail { retryable: bool },
    Hang(Duration),
}

/// Succeeds unless a step was scripted for the source id.
#[derive(Default)]
struct ScriptedHandler {
    seen: Mutex<Vec<(String, Vec<u8>, u32)>>,
    script: Mutex<HashMap<String, VecDeque<Step>>>,
}

impl ScriptedHandler {
    async fn script(&self, id: &str, steps: Vec<Step>) {
        self.script
            .lock()
            .await
            .insert(id.to_string(), steps.into_iter().collect());
    }

    async fn attempts_for(&self, id: &str) -> Vec<u32> {
        self.seen
            .lock()
            .await
            .iter()
            .filter(|(seen_id, _, _)| seen_id == id)
            .map(|(_, _, attempt)| *attempt)
            .collect()
    }
}

#[async_trait]
impl EventHandler for ScriptedHandler {
    type Outcome = ();
    type Error = ScriptedError;

    async fn handle(&self, event: &ChangeEvent) -> Result<(), ScriptedError> {
        self.seen.lock().await.push((
            event.record.id.clone(),
            event.record.payload.clone(),
            event.delivery_attempt,
        ));

        let step = self
            .script
            .lock()
            .await
            .get_mut(&event.record.id)
            .and_then(|steps| steps.pop_front());

        match step {
            None => Ok(()),
            Some(Step::Fail { retryable }) => Err(ScriptedError { retryable }),
            Some(Step::Hang(duration)) => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn fast_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(2))
}

struct Harness {
    store: Arc<MemorySourceStore>,
    handler: Arc<ScriptedHandler>,
    feed: ChangeFeed<ScriptedHandler>,
    dead_letters: tokio::sync::mpsc::UnboundedReceiver<DeadLetterEntry>,
}

async fn harness(position: StartingPosition) -> Harness {
    let store = Arc::new(MemorySourceStore::new());
    harness_on(store, position).await
}

async fn harness_on(store: Arc<MemorySourceStore>, position: StartingPosition) -> Harness {
    let source = Arc::new(MemoryFeedSource::attach(store.clone(), position).await);
    let handler = Arc::new(ScriptedHandler::default());
    let (sink, dead_letters) = ChannelDeadLetterSink::new();
    let policy = RetryPolicy::new(2, Arc::new(sink)).with_backoff(fast_backoff());
    let feed = ChangeFeed::new(source, handler.clone(), policy);
    Harness {
        store,
        handler,
        feed,
        dead_letters,
    }
}

async fn append(store: &MemorySourceStore, id: &str, payload: &str) {
    store
        .append(SourceRecord::new(id, payload.as_bytes().to_vec()))
        .await
        .unwrap();
}

// ============================================================================
// Delivery Tests
// ============================================================================

#[tokio::test]
async fn test_pump_delivers_every_record_once() {
    let mut h = harness(StartingPosition::TrimHorizon).await;
    append(&h.store, "a", "1").await;
    append(&h.store, "b", "2").await;

    let report = h.feed.pump().await.unwrap();
    assert_eq!(
        report,
        PumpReport {
            delivered: 2,
            succeeded: 2,
            dead_lettered: 0
        }
    );
    assert_eq!(h.handler.attempts_for("a").await, vec![1]);

    let idle = h.feed.pump().await.unwrap();
    assert!(idle.is_idle());
    assert!(h.dead_letters.try_recv().is_err());
}

#[tokio::test]
async fn test_retryable_failure_is_redelivered_then_succeeds() {
    let mut h = harness(StartingPosition::TrimHorizon).await;
    h.handler
        .script("a", vec![Step::Fail { retryable: true }])
        .await;
    append(&h.store, "a", "1").await;

    let report = h.feed.pump().await.unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(report.succeeded, 1);
    assert_eq!(h.handler.attempts_for("a").await, vec![1, 2]);
    assert!(h.dead_letters.try_recv().is_err());
}

#[tokio::test]
async fn test_exhausted_retries_dead_letter_with_two_attempts() {
    let mut h = harness(StartingPosition::TrimHorizon).await;
    h.handler
        .script(
            "a",
            vec![
                Step::Fail { retryable: true },
                Step::Fail { retryable: true },
                Step::Fail { retryable: true },
            ],
        )
        .await;
    append(&h.store, "a", "payload-a").await;

    let report = h.feed.pump().await.unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(report.dead_lettered, 1);

    let entry = h.dead_letters.recv().await.unwrap();
    assert_eq!(entry.attempts, 2);
    assert_eq!(entry.original_payload, b"payload-a".to_vec());
    assert_eq!(entry.source_id(), Some("a"));
    assert_eq!(
        entry.metadata.get(META_ERROR_KIND).map(String::as_str),
        Some("transient")
    );

    // No further redelivery.
    assert!(h.feed.pump().await.unwrap().is_idle());
    assert_eq!(h.handler.attempts_for("a").await, vec![1, 2]);
}

#[tokio::test]
async fn test_permanent_failure_dead_letters_on_first_attempt() {
    let mut h = harness(StartingPosition::TrimHorizon).await;
    h.handler
        .script("a", vec![Step::Fail { retryable: false }])
        .await;
    append(&h.store, "a", "not json").await;

    let report = h.feed.pump().await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(report.dead_lettered, 1);

    let entry = h.dead_letters.recv().await.unwrap();
    assert_eq!(entry.attempts, 1);
    assert_eq!(
        entry.metadata.get(META_ERROR_KIND).map(String::as_str),
        Some("permanent")
    );
}

#[tokio::test]
async fn test_invocation_timeout_counts_as_retryable_failure() {
    let mut h = harness(StartingPosition::TrimHorizon).await;
    h.handler
        .script(
            "slow",
            vec![
                Step::Hang(Duration::from_millis(500)),
                Step::Hang(Duration::from_millis(500)),
            ],
        )
        .await;
    let feed = h.feed.with_invocation_timeout(Duration::from_millis(20));
    append(&h.store, "slow", "x").await;

    let report = feed.pump().await.unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(report.dead_lettered, 1);

    let entry = h.dead_letters.recv().await.unwrap();
    assert_eq!(entry.attempts, 2);
    assert_eq!(
        entry.metadata.get(META_ERROR_KIND).map(String::as_str),
        Some(TIMEOUT_KIND)
    );
}

#[tokio::test]
async fn test_failed_deposit_does_not_block_lane() {
    let h = harness(StartingPosition::TrimHorizon).await;
    let Harness {
        store,
        handler,
        feed,
        dead_letters,
    } = h;
    drop(dead_letters);

    handler
        .script("a", vec![Step::Fail { retryable: false }])
        .await;
    append(&store, "a", "1").await;
    append(&store, "a", "2").await;

    let report = feed.pump().await.unwrap();
    assert_eq!(report.dead_lettered, 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(handler.attempts_for("a").await, vec![1, 1]);
}

#[tokio::test]
async fn test_per_key_order_is_preserved_across_lanes() {
    let h = harness(StartingPosition::TrimHorizon).await;
    let feed = h.feed.with_lanes(3);

    for i in 0..5 {
        for key in ["k1", "k2", "k3", "k4"] {
            append(&h.store, key, &i.to_string()).await;
        }
    }
    h.handler
        .script("k2", vec![Step::Fail { retryable: true }])
        .await;

    let report = feed.pump().await.unwrap();
    assert_eq!(report.succeeded, 20);

    let seen = h.handler.seen.lock().await;
    for key in ["k1", "k2", "k3", "k4"] {
        let payloads: Vec<String> = seen
            .iter()
            .filter(|(id, _, _)| id == key)
            .map(|(_, payload, _)| String::from_utf8(payload.clone()).unwrap())
            .collect();
        let mut expected: Vec<String> = (0..5).map(|i| i.to_string()).collect();
        if key == "k2" {
            // First event of k2 is delivered twice before the next one.
            expected.insert(0, "0".to_string());
        }
        assert_eq!(payloads, expected, "order for {}", key);
    }
}

#[test]
fn test_lane_for_is_stable_and_bounded() {
    for lanes in 1..8 {
        let lane = lane_for("sms-0001", lanes);
        assert!(lane < lanes);
        assert_eq!(lane, lane_for("sms-0001", lanes));
    }
}

// ============================================================================
// Starting Position Tests
// ============================================================================

#[tokio::test]
async fn test_latest_skips_existing_records() {
    let store = Arc::new(MemorySourceStore::new());
    append(&store, "old", "1").await;

    let h = harness_on(store, StartingPosition::Latest).await;
    append(&h.store, "new", "2").await;

    let report = h.feed.pump().await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert!(h.handler.attempts_for("old").await.is_empty());
    assert_eq!(h.handler.attempts_for("new").await, vec![1]);
}

#[tokio::test]
async fn test_trim_horizon_reads_existing_records() {
    let store = Arc::new(MemorySourceStore::new());
    append(&store, "old", "1").await;

    let h = harness_on(store, StartingPosition::TrimHorizon).await;
    let report = h.feed.pump().await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(h.handler.attempts_for("old").await, vec![1]);
}

#[tokio::test]
async fn test_poll_limit_bounds_cycle() {
    let h = harness(StartingPosition::TrimHorizon).await;
    let feed = h.feed.with_poll_limit(2);
    for id in ["a", "b", "c"] {
        append(&h.store, id, "x").await;
    }

    assert_eq!(feed.pump().await.unwrap().succeeded, 2);
    assert_eq!(feed.pump().await.unwrap().succeeded, 1);
}

// ============================================================================
// Run Loop Tests
// ============================================================================

#[tokio::test]
async fn test_run_delivers_and_stops_on_shutdown() {
    let h = harness(StartingPosition::TrimHorizon).await;
    let feed = Arc::new(h.feed.with_poll_interval(Duration::from_millis(5)));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let runner = {
        let feed = feed.clone();
        tokio::spawn(async move { feed.run(shutdown_rx).await })
    };

    append(&h.store, "a", "1").await;
    for _ in 0..100 {
        if !h.handler.attempts_for("a").await.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(h.handler.attempts_for("a").await, vec![1]);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), runner)
        .await
        .expect("feed should stop")
        .unwrap();
}
