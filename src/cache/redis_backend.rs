//! Redis-backed snapshot cache.

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::AsyncCommands;
use tracing::debug;

use super::SnapshotCache;
use crate::error::CacheError;
use crate::types::TodoSnapshot;

/// Snapshot cache backed by a Redis connection pool.
pub struct RedisCache {
    pool: Pool,
    key: String,
}

impl RedisCache {
    /// Build a pool for the given Redis URL.
    ///
    /// No connection is made until the first command, so pair this with
    /// [`RedisCache::ping`] where startup validation is wanted.
    pub fn connect(url: &str, key: impl Into<String>) -> Result<Self, CacheError> {
        let cfg = PoolConfig::from_url(url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::Connection(e.to_string()))?;
        Ok(Self {
            pool,
            key: key.into(),
        })
    }

    /// Round-trip a PING to verify the server is reachable.
    pub async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: () = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(())
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, CacheError> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))
    }
}

#[async_trait]
impl SnapshotCache for RedisCache {
    async fn read(&self) -> Result<Option<TodoSnapshot>, CacheError> {
        let mut conn = self.connection().await?;
        let payload: Option<String> = conn.get(&self.key).await?;
        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn write(&self, snapshot: &TodoSnapshot) -> Result<(), CacheError> {
        let payload = serde_json::to_string(snapshot)?;
        let mut conn = self.connection().await?;
        let _: () = conn.set(&self.key, payload).await?;
        debug!(todos = snapshot.todos.len(), key = %self.key, "snapshot written");
        Ok(())
    }

    async fn invalidate(&self) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: () = conn.del(&self.key).await?;
        Ok(())
    }
}
