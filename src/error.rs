//! Error taxonomy for the write pipeline.
//!
//! The split matters for delivery semantics: decode and validation failures
//! are permanent properties of a message and will never succeed on redelivery,
//! while store and cache failures are environmental and usually transient.
//! [`PipelineError::is_retriable`] encodes that distinction for the consumer.

use thiserror::Error;

/// The message body could not be parsed as JSON at all.
#[derive(Debug, Error)]
#[error("malformed envelope body: {0}")]
pub struct DecodeError(#[from] pub serde_json::Error);

/// The message body parsed but violates the envelope contract.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} is required")]
    MissingField { field: &'static str },

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("unknown action: {action:?}")]
    UnknownAction { action: String },

    #[error("unknown envelope field: {field:?}")]
    UnknownField { field: String },
}

impl ValidationError {
    pub fn missing(field: &'static str) -> Self {
        ValidationError::MissingField { field }
    }

    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ValidationError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// The entity store rejected or failed an operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("migration error: {0}")]
    Migration(#[from] refinery::Error),
}

/// The read cache could not be reached or refused a command.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache connection error: {0}")]
    Connection(String),

    #[error("cache command error: {0}")]
    Command(#[from] redis::RedisError),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The notification queue backend failed.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue backend error: {0}")]
    Backend(#[from] rusqlite::Error),

    #[error("invalid receipt handle: {0}")]
    InvalidReceipt(String),
}

/// Everything that can go wrong while processing one queued envelope.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    #[error("cache failure: {0}")]
    Cache(#[from] CacheError),
}

impl PipelineError {
    /// Whether redelivering the same message could plausibly succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            PipelineError::Decode(_) | PipelineError::Validation(_) => false,
            PipelineError::Store(_) | PipelineError::Cache(_) => true,
        }
    }
}

/// Failures surfaced to producers at submit time.
#[derive(Debug, Error)]
pub enum ProducerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("queue failure: {0}")]
    Queue(#[from] QueueError),
}
