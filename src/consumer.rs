//! The write-side worker: drains the queue and applies mutations.
//!
//! Processing one message runs a fixed sequence: decode, validate, apply,
//! cache refresh, acknowledge. The queue is at-least-once, so apply absorbs
//! duplicates: a create for an existing id and an update or delete for a
//! missing id all collapse into no-ops. A message is deleted from the queue
//! only after the whole sequence succeeds; anything else stays queued for
//! redelivery, and the queue parks repeat offenders in its dead-letter
//! table.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::cache::SnapshotCache;
use crate::db::Database;
use crate::envelope::{Envelope, Mutation};
use crate::error::{PipelineError, QueueError, StoreError};
use crate::queue::{NotificationQueue, QueueMessage};
use crate::retry::RetryPolicy;
use crate::types::{ApplyOutcome, TodoSnapshot};

/// Knobs for the consumer loop.
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    /// Retry policy for the cache refresh step.
    pub refresh_retry: RetryPolicy,
    /// Pause after a queue backend failure before polling again.
    pub error_backoff: Duration,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            refresh_retry: RetryPolicy::default(),
            error_backoff: Duration::from_secs(5),
        }
    }
}

/// What one poll of the queue amounted to.
#[derive(Debug)]
pub enum PollResult {
    /// The wait elapsed with nothing to deliver.
    Idle,
    /// A message was processed and acknowledged.
    Acked(ApplyOutcome),
    /// Processing failed; the message stays queued for redelivery.
    Unacked(PipelineError),
}

/// The single writer of the entity store and the read cache.
pub struct Consumer {
    db: Database,
    cache: Arc<dyn SnapshotCache>,
    queue: Arc<dyn NotificationQueue>,
    options: ConsumerOptions,
}

impl Consumer {
    /// Wire up a consumer. Every collaborator is passed in explicitly,
    /// nothing is reached through globals.
    pub fn new(
        db: Database,
        cache: Arc<dyn SnapshotCache>,
        queue: Arc<dyn NotificationQueue>,
        options: ConsumerOptions,
    ) -> Self {
        Self {
            db,
            cache,
            queue,
            options,
        }
    }

    /// Process one raw message body end to end.
    pub async fn process(&self, body: &str) -> Result<ApplyOutcome, PipelineError> {
        let envelope = Envelope::parse(body)?;
        debug!(
            todo_id = envelope.todo_id,
            action = envelope.mutation.action(),
            "envelope validated"
        );

        let outcome = self.apply(&envelope)?;
        self.refresh_cache().await?;

        info!(
            todo_id = envelope.todo_id,
            action = envelope.mutation.action(),
            outcome = ?outcome,
            "mutation processed"
        );
        Ok(outcome)
    }

    /// Apply a validated mutation to the store, absorbing duplicates.
    fn apply(&self, envelope: &Envelope) -> Result<ApplyOutcome, StoreError> {
        match &envelope.mutation {
            Mutation::Create(new) => {
                if self.db.get_todo(envelope.todo_id)?.is_some() {
                    info!(
                        todo_id = envelope.todo_id,
                        "todo already exists, duplicate create skipped"
                    );
                    return Ok(ApplyOutcome::Noop);
                }
                self.db.insert_todo(envelope.todo_id, new)?;
                Ok(ApplyOutcome::Applied)
            }
            Mutation::Update(patch) => match self.db.update_todo(envelope.todo_id, patch)? {
                Some(_) => Ok(ApplyOutcome::Applied),
                None => {
                    info!(todo_id = envelope.todo_id, "no todo to update, skipping");
                    Ok(ApplyOutcome::Noop)
                }
            },
            Mutation::Delete => {
                if self.db.delete_todo(envelope.todo_id)? {
                    Ok(ApplyOutcome::Applied)
                } else {
                    info!(todo_id = envelope.todo_id, "no todo to delete, skipping");
                    Ok(ApplyOutcome::Noop)
                }
            }
        }
    }

    /// Rebuild the cache snapshot from the store, retrying per policy.
    async fn refresh_cache(&self) -> Result<(), PipelineError> {
        self.options
            .refresh_retry
            .run("cache refresh", PipelineError::is_retriable, || async {
                self.cache.invalidate().await.map_err(PipelineError::from)?;
                let todos = self.db.list_todos()?;
                let snapshot = TodoSnapshot::new(todos);
                self.cache
                    .write(&snapshot)
                    .await
                    .map_err(PipelineError::from)?;
                Ok(())
            })
            .await
    }

    /// Process a received message and acknowledge on success.
    ///
    /// Returns `Err` only when the acknowledge itself fails; the mutation is
    /// committed by then, so the eventual redelivery collapses to a no-op.
    async fn handle(&self, message: QueueMessage) -> Result<PollResult, QueueError> {
        match self.process(&message.body).await {
            Ok(outcome) => {
                self.queue.delete(&message.receipt_handle).await?;
                Ok(PollResult::Acked(outcome))
            }
            Err(e) => {
                error!(
                    message_id = %message.id,
                    receive_count = message.receive_count,
                    retriable = e.is_retriable(),
                    error = %e,
                    "message processing failed, leaving it for redelivery"
                );
                Ok(PollResult::Unacked(e))
            }
        }
    }

    /// One receive/process/acknowledge cycle.
    pub async fn poll_once(&self) -> Result<PollResult, QueueError> {
        match self.queue.receive().await? {
            Some(message) => self.handle(message).await,
            None => Ok(PollResult::Idle),
        }
    }

    /// Run until `shutdown` flips to true.
    ///
    /// Shutdown is only observed between messages: once a message has been
    /// received it is processed to completion.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("consumer started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let received = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // Sender dropped; nothing will ever signal us again.
                        break;
                    }
                    continue;
                }
                received = self.queue.receive() => received,
            };

            match received {
                Ok(Some(message)) => {
                    if let Err(e) = self.handle(message).await {
                        error!(error = %e, "queue acknowledge failed, backing off");
                        tokio::time::sleep(self.options.error_backoff).await;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, "queue receive failed, backing off");
                    tokio::time::sleep(self.options.error_backoff).await;
                }
            }
        }
        info!("consumer stopped");
    }
}
