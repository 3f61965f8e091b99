//! SourceStore trait definition.

use async_trait::async_trait;

use super::Result;
use crate::model::SourceRecord;

/// Interface for the SMS (source) table.
///
/// Records are written externally and never mutated. Every append is a new
/// entry on the table's change stream.
///
/// Implementations:
/// - `MemorySourceStore`: in-memory append-only log, doubles as the feed source
/// - `DynamoSourceStore`: DynamoDB table with streams enabled
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Append a source record.
    async fn append(&self, record: SourceRecord) -> Result<()>;

    /// Fetch the latest version of a source record.
    async fn get(&self, id: &str) -> Result<Option<SourceRecord>>;
}
