//! Feed source over the in-memory sms table.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{FeedError, FeedSource, StartingPosition, StreamRecord};
use crate::model::SequenceToken;
use crate::storage::memory::MemorySourceStore;

/// Reads the append log of a [`MemorySourceStore`].
pub struct MemoryFeedSource {
    store: Arc<MemorySourceStore>,
    /// Sequence number of the last record handed out.
    cursor: Mutex<u64>,
}

impl MemoryFeedSource {
    /// Attach to the table at `position`.
    ///
    /// With [`StartingPosition::Latest`] records already in the table are
    /// never delivered.
    pub async fn attach(store: Arc<MemorySourceStore>, position: StartingPosition) -> Self {
        let cursor = match position {
            StartingPosition::Latest => store.head().await,
            StartingPosition::TrimHorizon => 0,
        };
        Self {
            store,
            cursor: Mutex::new(cursor),
        }
    }

    /// Sequence number of the last record handed out.
    pub async fn cursor(&self) -> u64 {
        *self.cursor.lock().await
    }
}

#[async_trait]
impl FeedSource for MemoryFeedSource {
    async fn poll(&self, max: usize) -> Result<Vec<StreamRecord>, FeedError> {
        let mut cursor = self.cursor.lock().await;
        let entries = self.store.read_after(*cursor, max).await;

        if let Some((last, _)) = entries.last() {
            *cursor = *last;
        }

        Ok(entries
            .into_iter()
            .map(|(sequence, record)| StreamRecord {
                record,
                sequence_token: SequenceToken::from_sequence(sequence),
            })
            .collect())
    }
}
