//! Read cache holding a snapshot of the whole todo collection.

pub mod memory;
pub mod redis_backend;

pub use memory::MemoryCache;
pub use redis_backend::RedisCache;

use async_trait::async_trait;

use crate::error::CacheError;
use crate::types::TodoSnapshot;

/// Key under which backends with a keyspace store the snapshot.
pub const SNAPSHOT_KEY: &str = "all_todos";

/// Snapshot storage used by the read path.
///
/// The consumer rebuilds the snapshot after every applied mutation, so a
/// backend only ever holds the latest whole-collection state. Backend
/// failures are never fatal to readers, which fall through to the store.
#[async_trait]
pub trait SnapshotCache: Send + Sync {
    /// Fetch the current snapshot, if one is cached.
    async fn read(&self) -> Result<Option<TodoSnapshot>, CacheError>;

    /// Replace the snapshot.
    async fn write(&self, snapshot: &TodoSnapshot) -> Result<(), CacheError>;

    /// Drop the snapshot so readers fall through to the store.
    async fn invalidate(&self) -> Result<(), CacheError>;
}
