//! In-process snapshot cache for tests and single-node runs.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::SnapshotCache;
use crate::error::CacheError;
use crate::types::TodoSnapshot;

/// Snapshot cache held in process memory.
#[derive(Clone, Default)]
pub struct MemoryCache {
    slot: Arc<RwLock<Option<TodoSnapshot>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotCache for MemoryCache {
    async fn read(&self) -> Result<Option<TodoSnapshot>, CacheError> {
        Ok(self.slot.read().await.clone())
    }

    async fn write(&self, snapshot: &TodoSnapshot) -> Result<(), CacheError> {
        *self.slot.write().await = Some(snapshot.clone());
        Ok(())
    }

    async fn invalidate(&self) -> Result<(), CacheError> {
        *self.slot.write().await = None;
        Ok(())
    }
}
