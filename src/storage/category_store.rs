//! CategoryStore trait definition.

use async_trait::async_trait;

use super::Result;
use crate::model::CategoryMapping;

/// Interface for the description to category mapping table.
///
/// Keyed by description. Upsert only; the last write wins.
#[async_trait]
pub trait CategoryStore: Send + Sync {
    /// Look up the mapping for a description.
    async fn get(&self, description: &str) -> Result<Option<CategoryMapping>>;

    /// Insert or replace the mapping for `mapping.description`.
    async fn upsert(&self, mapping: &CategoryMapping) -> Result<()>;
}
