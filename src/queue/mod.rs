//! At-least-once notification queue between producers and the consumer.

pub mod sqlite;

pub use sqlite::{DeadLetter, QueueCounts, QueueOptions, SqliteQueue};

use async_trait::async_trait;

use crate::error::QueueError;

/// A message as handed to a receiver.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub id: String,
    /// Opaque token tied to this particular delivery. Needed to delete.
    pub receipt_handle: String,
    pub body: String,
    /// How many times the message has been delivered, this one included.
    pub receive_count: u32,
}

/// Broker-style delivery contract.
///
/// Receivers lease a message for a visibility window and must delete it once
/// processed; a message that is never deleted becomes visible again and is
/// redelivered. Nothing here is exactly-once, which is why applying an
/// envelope has to be idempotent.
#[async_trait]
pub trait NotificationQueue: Send + Sync {
    /// Enqueue a message body. Returns the broker-assigned message id.
    async fn send(&self, body: &str) -> Result<String, QueueError>;

    /// Long-poll for the next visible message, up to the backend's
    /// configured wait time. `None` means the wait elapsed empty.
    async fn receive(&self) -> Result<Option<QueueMessage>, QueueError>;

    /// Acknowledge a delivery, removing the message for good.
    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError>;
}
