//! In-memory category mapping table.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::FaultInjector;
use crate::model::CategoryMapping;
use crate::storage::{CategoryStore, Result};

#[derive(Default)]
pub struct MemoryCategoryStore {
    mappings: RwLock<HashMap<String, CategoryMapping>>,
    faults: FaultInjector,
}

impl MemoryCategoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    pub async fn len(&self) -> usize {
        self.mappings.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.mappings.read().await.is_empty()
    }
}

#[async_trait]
impl CategoryStore for MemoryCategoryStore {
    async fn get(&self, description: &str) -> Result<Option<CategoryMapping>> {
        self.faults.check("categories").await?;
        Ok(self.mappings.read().await.get(description).cloned())
    }

    async fn upsert(&self, mapping: &CategoryMapping) -> Result<()> {
        self.faults.check("categories").await?;
        self.mappings
            .write()
            .await
            .insert(mapping.description.clone(), mapping.clone());
        Ok(())
    }
}
