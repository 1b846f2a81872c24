//! Submit side of the pipeline: turns client requests into queued envelopes.
//!
//! Producers never touch the store or the cache. They validate what they
//! can synchronously (a create without a title is rejected before it is
//! queued), build the flat envelope JSON, and hand it to the queue. The
//! caller gets a receipt immediately; the record itself materializes when
//! the consumer gets to the message.

use chrono::Utc;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::info;

use crate::envelope::{ACTION_CREATED, ACTION_DELETED, ACTION_UPDATED};
use crate::error::{ProducerError, ValidationError};
use crate::queue::NotificationQueue;
use crate::types::{NewTodo, TodoPatch};

/// Receipt returned to the caller once a request is queued.
///
/// For creates the id is provisional: it names the record the consumer will
/// eventually write, not one that exists yet.
#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    pub todo_id: i64,
    pub message_id: String,
}

/// Builds envelopes and enqueues them.
pub struct Producer {
    queue: Arc<dyn NotificationQueue>,
}

impl Producer {
    pub fn new(queue: Arc<dyn NotificationQueue>) -> Self {
        Self { queue }
    }

    /// Queue a create. The id in the receipt is assigned here, ahead of the
    /// consumer writing the record.
    pub async fn submit_create(&self, new: &NewTodo) -> Result<SubmitReceipt, ProducerError> {
        if new.title.trim().is_empty() {
            return Err(ValidationError::invalid("title", "must not be empty").into());
        }

        let todo_id = provisional_id();
        let mut body = envelope_base(todo_id, ACTION_CREATED);
        body.insert("title".into(), json!(new.title));
        if let Some(description) = &new.description {
            body.insert("description".into(), json!(description));
        }
        body.insert("status".into(), json!(new.status));
        body.insert("priority".into(), json!(new.priority));
        if let Some(due_date) = &new.due_date {
            body.insert("due_date".into(), json!(due_date.to_rfc3339()));
        }

        self.send(todo_id, ACTION_CREATED, body).await
    }

    /// Queue an update carrying only the supplied fields.
    pub async fn submit_update(
        &self,
        todo_id: i64,
        patch: &TodoPatch,
    ) -> Result<SubmitReceipt, ProducerError> {
        if let Some(title) = &patch.title {
            if title.trim().is_empty() {
                return Err(ValidationError::invalid("title", "must not be empty").into());
            }
        }

        let mut body = envelope_base(todo_id, ACTION_UPDATED);
        if let Some(title) = &patch.title {
            body.insert("title".into(), json!(title));
        }
        match &patch.description {
            Some(Some(description)) => {
                body.insert("description".into(), json!(description));
            }
            Some(None) => {
                body.insert("description".into(), Value::Null);
            }
            None => {}
        }
        if let Some(status) = patch.status {
            body.insert("status".into(), json!(status));
        }
        if let Some(priority) = patch.priority {
            body.insert("priority".into(), json!(priority));
        }
        match patch.due_date {
            Some(Some(due_date)) => {
                body.insert("due_date".into(), json!(due_date.to_rfc3339()));
            }
            Some(None) => {
                body.insert("due_date".into(), Value::Null);
            }
            None => {}
        }

        self.send(todo_id, ACTION_UPDATED, body).await
    }

    /// Queue a delete.
    pub async fn submit_delete(&self, todo_id: i64) -> Result<SubmitReceipt, ProducerError> {
        let body = envelope_base(todo_id, ACTION_DELETED);
        self.send(todo_id, ACTION_DELETED, body).await
    }

    async fn send(
        &self,
        todo_id: i64,
        action: &str,
        body: Map<String, Value>,
    ) -> Result<SubmitReceipt, ProducerError> {
        let payload = Value::Object(body).to_string();
        let message_id = self.queue.send(&payload).await?;
        info!(todo_id, action, message_id = %message_id, "request queued");
        Ok(SubmitReceipt {
            todo_id,
            message_id,
        })
    }
}

fn envelope_base(todo_id: i64, action: &str) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert("todo_id".into(), json!(todo_id));
    body.insert("action".into(), json!(action));
    body.insert("timestamp".into(), json!(Utc::now().to_rfc3339()));
    body
}

/// Provisional id for a record that does not exist yet: seconds since the
/// epoch at submit time. Two creates in the same second collide and the
/// later one collapses into a duplicate-create no-op downstream.
fn provisional_id() -> i64 {
    Utc::now().timestamp()
}
