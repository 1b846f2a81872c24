//! Read path shared by the CLI: snapshot first, store as fallback.

use tracing::{debug, warn};

use crate::cache::SnapshotCache;
use crate::db::Database;
use crate::error::StoreError;
use crate::types::Todo;

/// List all todos, serving from the cache snapshot when one is available.
///
/// Cache trouble is logged and absorbed; the store answers instead.
pub async fn list_todos(cache: &dyn SnapshotCache, db: &Database) -> Result<Vec<Todo>, StoreError> {
    match cache.read().await {
        Ok(Some(snapshot)) => {
            debug!(
                todos = snapshot.todos.len(),
                cached_at = %snapshot.cached_at,
                "serving list from snapshot"
            );
            return Ok(snapshot.todos);
        }
        Ok(None) => debug!("no snapshot cached, falling back to store"),
        Err(e) => warn!(error = %e, "cache read failed, falling back to store"),
    }
    db.list_todos()
}

/// Fetch one todo, trying the cache snapshot first.
pub async fn get_todo(
    cache: &dyn SnapshotCache,
    db: &Database,
    id: i64,
) -> Result<Option<Todo>, StoreError> {
    match cache.read().await {
        Ok(Some(snapshot)) => {
            if let Some(todo) = snapshot.find(id) {
                debug!(todo_id = id, "serving todo from snapshot");
                return Ok(Some(todo.clone()));
            }
            // Not in the snapshot; the store has the final word in case
            // the snapshot lags a just-applied create.
        }
        Ok(None) => {}
        Err(e) => warn!(error = %e, todo_id = id, "cache read failed, falling back to store"),
    }
    db.get_todo(id)
}
