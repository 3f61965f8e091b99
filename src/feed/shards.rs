//! Shard bookkeeping for sharded change streams.
//!
//! [`ShardReader`] turns a stream made of shards into a single [`FeedSource`].
//! The stream calls themselves sit behind [`ShardApi`] so the bookkeeping does
//! not depend on any SDK.
//!
//! Rules:
//! - A shard whose read fails keeps its iterator and is retried on the next
//!   poll. Records already taken from other shards are still returned.
//! - A shard is only marked known once it has a cursor, so a failed iterator
//!   request is retried instead of orphaning the shard.
//! - A child shard is not read while its parent still has a cursor. Records
//!   for one key therefore come out in commit order across a split.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{FeedError, FeedSource, StartingPosition, StreamRecord};
use crate::model::{SequenceToken, SourceRecord};

/// A single read returns at most this many records.
pub const MAX_RECORDS_PER_CALL: usize = 1000;

/// A shard as listed by the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardInfo {
    pub shard_id: String,
    pub parent_shard_id: Option<String>,
    /// The shard has an ending sequence number and takes no new writes.
    pub closed: bool,
}

/// Where a new shard iterator starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IteratorPosition {
    Latest,
    TrimHorizon,
    AfterSequence(String),
}

/// One record read from a shard.
#[derive(Debug, Clone)]
pub struct ShardRecord {
    pub sequence: String,
    /// `None` for records that are read past but not delivered.
    pub record: Option<SourceRecord>,
}

/// Result of one read.
#[derive(Debug, Clone, Default)]
pub struct RecordsPage {
    pub records: Vec<ShardRecord>,
    /// `None` once a closed shard is exhausted.
    pub next_iterator: Option<String>,
}

/// Why a read failed.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("shard iterator expired")]
    ExpiredIterator,

    #[error(transparent)]
    Failed(#[from] FeedError),
}

/// The three stream calls the reader needs.
#[async_trait]
pub trait ShardApi: Send + Sync {
    /// Every shard of the stream, following pagination.
    async fn list_shards(&self) -> Result<Vec<ShardInfo>, FeedError>;

    /// A fresh iterator, or `None` when the shard has nothing left to read.
    async fn shard_iterator(
        &self,
        shard_id: &str,
        position: IteratorPosition,
    ) -> Result<Option<String>, FeedError>;

    async fn read(&self, iterator: &str, limit: usize) -> Result<RecordsPage, ReadError>;
}

struct ShardCursor {
    shard_id: String,
    parent_shard_id: Option<String>,
    /// Position used when there is no sequence to resume after.
    start: IteratorPosition,
    /// `None` until an iterator was obtained, and again after one expired.
    iterator: Option<String>,
    last_sequence: Option<String>,
}

impl ShardCursor {
    fn resume_position(&self) -> IteratorPosition {
        match &self.last_sequence {
            Some(sequence) => IteratorPosition::AfterSequence(sequence.clone()),
            None => self.start.clone(),
        }
    }
}

#[derive(Default)]
struct ReaderState {
    /// Shards with a cursor, in discovery order.
    open: Vec<ShardCursor>,
    /// Every shard ever given a cursor or deliberately skipped.
    known: HashSet<String>,
    attached: bool,
    needs_refresh: bool,
}

/// [`FeedSource`] over a sharded stream.
pub struct ShardReader<A> {
    api: A,
    position: StartingPosition,
    state: Mutex<ReaderState>,
}

impl<A: ShardApi> ShardReader<A> {
    pub fn new(api: A, position: StartingPosition) -> Self {
        Self {
            api,
            position,
            state: Mutex::new(ReaderState {
                needs_refresh: true,
                ..Default::default()
            }),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Give a cursor to every shard not seen before.
    async fn refresh(&self, state: &mut ReaderState) -> Result<(), FeedError> {
        for shard in self.api.list_shards().await? {
            if state.known.contains(&shard.shard_id) {
                continue;
            }

            let start = if state.attached {
                // Appeared after attach: everything in it is new.
                IteratorPosition::TrimHorizon
            } else {
                match self.position {
                    // Closed shards only hold history.
                    StartingPosition::Latest if shard.closed => {
                        state.known.insert(shard.shard_id);
                        continue;
                    }
                    StartingPosition::Latest => IteratorPosition::Latest,
                    StartingPosition::TrimHorizon => IteratorPosition::TrimHorizon,
                }
            };

            debug!(shard_id = %shard.shard_id, parent = ?shard.parent_shard_id, "Tracking shard");
            state.known.insert(shard.shard_id.clone());
            state.open.push(ShardCursor {
                shard_id: shard.shard_id,
                parent_shard_id: shard.parent_shard_id,
                start,
                iterator: None,
                last_sequence: None,
            });
        }

        state.attached = true;
        state.needs_refresh = false;
        Ok(())
    }
}

#[async_trait]
impl<A: ShardApi> FeedSource for ShardReader<A> {
    async fn poll(&self, max: usize) -> Result<Vec<StreamRecord>, FeedError> {
        let mut state = self.state.lock().await;
        if state.needs_refresh || state.open.is_empty() {
            self.refresh(&mut state).await?;
        }

        let open_ids: HashSet<String> = state.open.iter().map(|c| c.shard_id.clone()).collect();
        let mut records = Vec::new();
        let mut finished = Vec::new();
        let mut failure: Option<FeedError> = None;

        for cursor in state.open.iter_mut() {
            if records.len() >= max {
                break;
            }
            if let Some(parent) = &cursor.parent_shard_id {
                if open_ids.contains(parent) {
                    continue;
                }
            }

            let iterator = match cursor.iterator.clone() {
                Some(iterator) => iterator,
                None => match self
                    .api
                    .shard_iterator(&cursor.shard_id, cursor.resume_position())
                    .await
                {
                    Ok(Some(iterator)) => {
                        cursor.iterator = Some(iterator.clone());
                        iterator
                    }
                    Ok(None) => {
                        finished.push(cursor.shard_id.clone());
                        continue;
                    }
                    Err(e) => {
                        warn!(shard_id = %cursor.shard_id, error = %e, "Failed to get shard iterator");
                        if failure.is_none() {
                            failure = Some(e);
                        }
                        continue;
                    }
                },
            };

            let limit = (max - records.len()).min(MAX_RECORDS_PER_CALL);
            let page = match self.api.read(&iterator, limit).await {
                Ok(page) => page,
                Err(ReadError::ExpiredIterator) => {
                    warn!(shard_id = %cursor.shard_id, "Shard iterator expired, renewing on next poll");
                    cursor.iterator = None;
                    continue;
                }
                Err(ReadError::Failed(e)) => {
                    warn!(shard_id = %cursor.shard_id, error = %e, "Failed to read shard");
                    if failure.is_none() {
                        failure = Some(e);
                    }
                    continue;
                }
            };

            for shard_record in page.records {
                cursor.last_sequence = Some(shard_record.sequence.clone());
                if let Some(record) = shard_record.record {
                    records.push(StreamRecord {
                        record,
                        sequence_token: SequenceToken::new(shard_record.sequence),
                    });
                }
            }

            cursor.iterator = page.next_iterator;
            if cursor.iterator.is_none() {
                finished.push(cursor.shard_id.clone());
            }
        }

        if !finished.is_empty() {
            state.open.retain(|c| !finished.contains(&c.shard_id));
            state.needs_refresh = true;
            debug!(shards = ?finished, "Shards closed");
        }

        // Nothing was taken, so surfacing the error loses nothing.
        match failure {
            Some(e) if records.is_empty() => Err(e),
            _ => Ok(records),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex as StdMutex;

    use super::*;

    enum Step {
        Page(Vec<&'static str>),
        Last(Vec<&'static str>),
        Undelivered(&'static str),
        Fail,
        Expire,
    }

    /// Scripted stream. Iterators are the shard id itself.
    #[derive(Default)]
    struct FakeStream {
        shards: StdMutex<Vec<ShardInfo>>,
        steps: StdMutex<HashMap<String, VecDeque<Step>>>,
        iterator_failures: StdMutex<HashMap<String, u32>>,
        iterator_requests: StdMutex<Vec<(String, IteratorPosition)>>,
    }

    impl FakeStream {
        fn shard(self, id: &str, parent: Option<&str>, closed: bool) -> Self {
            self.add_shard(id, parent);
            if closed {
                if let Some(shard) = self.shards.lock().unwrap().last_mut() {
                    shard.closed = true;
                }
            }
            self
        }

        fn add_shard(&self, id: &str, parent: Option<&str>) {
            self.shards.lock().unwrap().push(ShardInfo {
                shard_id: id.to_string(),
                parent_shard_id: parent.map(str::to_string),
                closed: false,
            });
        }

        fn script(self, id: &str, steps: Vec<Step>) -> Self {
            self.steps
                .lock()
                .unwrap()
                .insert(id.to_string(), steps.into_iter().collect());
            self
        }

        fn fail_iterator(self, id: &str, times: u32) -> Self {
            self.iterator_failures
                .lock()
                .unwrap()
                .insert(id.to_string(), times);
            self
        }

        fn requests(&self) -> Vec<(String, IteratorPosition)> {
            self.iterator_requests.lock().unwrap().clone()
        }
    }

    fn shard_record(sequence: &str) -> ShardRecord {
        ShardRecord {
            sequence: sequence.to_string(),
            record: Some(SourceRecord::new(sequence, b"{}".to_vec())),
        }
    }

    #[async_trait]
    impl ShardApi for FakeStream {
        async fn list_shards(&self) -> Result<Vec<ShardInfo>, FeedError> {
            Ok(self.shards.lock().unwrap().clone())
        }

        async fn shard_iterator(
            &self,
            shard_id: &str,
            position: IteratorPosition,
        ) -> Result<Option<String>, FeedError> {
            self.iterator_requests
                .lock()
                .unwrap()
                .push((shard_id.to_string(), position));
            let mut failures = self.iterator_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(shard_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(FeedError::Source("throttled".to_string()));
                }
            }
            Ok(Some(shard_id.to_string()))
        }

        async fn read(&self, iterator: &str, _limit: usize) -> Result<RecordsPage, ReadError> {
            let step = self
                .steps
                .lock()
                .unwrap()
                .get_mut(iterator)
                .and_then(VecDeque::pop_front);
            let page = |sequences: Vec<&str>, next: Option<String>| RecordsPage {
                records: sequences.into_iter().map(shard_record).collect(),
                next_iterator: next,
            };
            match step {
                None => Ok(page(vec![], Some(iterator.to_string()))),
                Some(Step::Page(sequences)) => Ok(page(sequences, Some(iterator.to_string()))),
                Some(Step::Last(sequences)) => Ok(page(sequences, None)),
                Some(Step::Undelivered(sequence)) => Ok(RecordsPage {
                    records: vec![ShardRecord {
                        sequence: sequence.to_string(),
                        record: None,
                    }],
                    next_iterator: Some(iterator.to_string()),
                }),
                Some(Step::Fail) => Err(FeedError::Source("internal server error".to_string()).into()),
                Some(Step::Expire) => Err(ReadError::ExpiredIterator),
            }
        }
    }

    fn sequences(records: &[StreamRecord]) -> Vec<String> {
        records
            .iter()
            .map(|r| r.sequence_token.as_str().to_string())
            .collect()
    }

    // ============================================================================
    // Failure isolation
    // ============================================================================

    #[tokio::test]
    async fn test_failing_shard_keeps_records_from_earlier_shard() {
        let stream = FakeStream::default()
            .shard("a", None, false)
            .shard("b", None, false)
            .script("a", vec![Step::Page(vec!["a-1"])])
            .script("b", vec![Step::Fail, Step::Page(vec!["b-1"])]);
        let reader = ShardReader::new(stream, StartingPosition::TrimHorizon);

        let first = reader.poll(100).await.unwrap();
        assert_eq!(sequences(&first), vec!["a-1"]);

        let second = reader.poll(100).await.unwrap();
        assert_eq!(sequences(&second), vec!["b-1"]);
    }

    #[tokio::test]
    async fn test_error_surfaces_only_when_nothing_was_read() {
        let stream = FakeStream::default()
            .shard("a", None, false)
            .script("a", vec![Step::Fail, Step::Page(vec!["a-1"])]);
        let reader = ShardReader::new(stream, StartingPosition::TrimHorizon);

        assert!(matches!(reader.poll(100).await, Err(FeedError::Source(_))));
        assert_eq!(sequences(&reader.poll(100).await.unwrap()), vec!["a-1"]);
    }

    #[tokio::test]
    async fn test_iterator_failure_does_not_orphan_shard() {
        let stream = FakeStream::default()
            .shard("a", None, false)
            .fail_iterator("a", 1)
            .script("a", vec![Step::Page(vec!["a-1"])]);
        let reader = ShardReader::new(stream, StartingPosition::TrimHorizon);

        assert!(reader.poll(100).await.is_err());
        assert_eq!(sequences(&reader.poll(100).await.unwrap()), vec!["a-1"]);
        assert_eq!(reader.api().requests().len(), 2);
    }

    #[tokio::test]
    async fn test_expired_iterator_resumes_after_last_sequence() {
        let stream = FakeStream::default()
            .shard("a", None, false)
            .script(
                "a",
                vec![Step::Page(vec!["a-1"]), Step::Expire, Step::Page(vec!["a-2"])],
            );
        let reader = ShardReader::new(stream, StartingPosition::TrimHorizon);

        assert_eq!(sequences(&reader.poll(100).await.unwrap()), vec!["a-1"]);
        assert!(reader.poll(100).await.unwrap().is_empty());
        assert_eq!(sequences(&reader.poll(100).await.unwrap()), vec!["a-2"]);

        assert_eq!(
            reader.api().requests(),
            vec![
                ("a".to_string(), IteratorPosition::TrimHorizon),
                ("a".to_string(), IteratorPosition::AfterSequence("a-1".to_string())),
            ]
        );
    }

    // ============================================================================
    // Shard lineage
    // ============================================================================

    #[tokio::test]
    async fn test_child_waits_until_parent_is_exhausted() {
        let stream = FakeStream::default()
            .shard("parent", None, false)
            .shard("child", Some("parent"), false)
            .script(
                "parent",
                vec![Step::Page(vec!["p-1"]), Step::Last(vec!["p-2"])],
            )
            .script("child", vec![Step::Page(vec!["c-1"])]);
        let reader = ShardReader::new(stream, StartingPosition::TrimHorizon);

        let mut delivered = Vec::new();
        for _ in 0..4 {
            delivered.extend(sequences(&reader.poll(100).await.unwrap()));
        }

        assert_eq!(delivered, vec!["p-1", "p-2", "c-1"]);
    }

    #[tokio::test]
    async fn test_child_of_unknown_parent_is_read() {
        let stream = FakeStream::default()
            .shard("child", Some("trimmed"), false)
            .script("child", vec![Step::Page(vec!["c-1"])]);
        let reader = ShardReader::new(stream, StartingPosition::TrimHorizon);

        assert_eq!(sequences(&reader.poll(100).await.unwrap()), vec!["c-1"]);
    }

    // ============================================================================
    // Starting position
    // ============================================================================

    #[tokio::test]
    async fn test_latest_skips_closed_shards_at_attach() {
        let stream = FakeStream::default()
            .shard("old", None, true)
            .shard("live", Some("old"), false);
        let reader = ShardReader::new(stream, StartingPosition::Latest);

        assert!(reader.poll(100).await.unwrap().is_empty());
        assert_eq!(
            reader.api().requests(),
            vec![("live".to_string(), IteratorPosition::Latest)]
        );
    }

    #[tokio::test]
    async fn test_shards_found_after_attach_start_at_trim_horizon() {
        let stream = FakeStream::default()
            .shard("a", None, false)
            .script("a", vec![Step::Last(vec!["a-1"])]);
        let reader = ShardReader::new(stream, StartingPosition::Latest);

        assert_eq!(sequences(&reader.poll(100).await.unwrap()), vec!["a-1"]);

        reader.api().add_shard("b", Some("a"));
        reader.poll(100).await.unwrap();

        assert_eq!(
            reader.api().requests(),
            vec![
                ("a".to_string(), IteratorPosition::Latest),
                ("b".to_string(), IteratorPosition::TrimHorizon),
            ]
        );
    }

    #[tokio::test]
    async fn test_undelivered_records_still_advance_the_cursor() {
        let stream = FakeStream::default()
            .shard("a", None, false)
            .script("a", vec![Step::Undelivered("a-1"), Step::Expire]);
        let reader = ShardReader::new(stream, StartingPosition::TrimHorizon);

        assert!(reader.poll(100).await.unwrap().is_empty());
        assert!(reader.poll(100).await.unwrap().is_empty());
        reader.poll(100).await.unwrap();

        assert_eq!(
            reader.api().requests().last(),
            Some(&("a".to_string(), IteratorPosition::AfterSequence("a-1".to_string())))
        );
    }
}
