//! SQLite-backed queue with visibility timeouts and a dead-letter table.
//!
//! Delivery state lives in two tables: `messages` holds everything still in
//! play (a row is "in flight" while its `visible_at` lies in the future), and
//! `dead_letters` holds messages that burned through their delivery budget.
//! Receipt handles encode the delivery generation, so an ack from a stale
//! delivery cannot remove a message that has since been handed out again.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{NotificationQueue, QueueMessage};
use crate::error::QueueError;

/// How often `receive` re-checks for work while long-polling.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    body TEXT NOT NULL,
    enqueued_at INTEGER NOT NULL,
    visible_at INTEGER NOT NULL,
    receive_count INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_messages_visible_at ON messages(visible_at);

CREATE TABLE IF NOT EXISTS dead_letters (
    id INTEGER PRIMARY KEY,
    body TEXT NOT NULL,
    enqueued_at INTEGER NOT NULL,
    dead_lettered_at INTEGER NOT NULL,
    receive_count INTEGER NOT NULL
);
";

/// Delivery tuning for a [`SqliteQueue`].
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// How long a delivered message stays invisible before it returns.
    pub visibility_timeout: Duration,
    /// Deliveries after which a message is parked in `dead_letters`.
    pub max_receive_count: u32,
    /// Upper bound on how long `receive` waits for a message.
    pub wait_time: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(60),
            max_receive_count: 3,
            wait_time: Duration::from_secs(20),
        }
    }
}

/// Message counts by delivery state, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueCounts {
    pub ready: u64,
    pub in_flight: u64,
    pub dead: u64,
}

/// A message parked in the dead-letter table.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub id: i64,
    pub body: String,
    pub enqueued_at: DateTime<Utc>,
    pub dead_lettered_at: DateTime<Utc>,
    pub receive_count: u32,
}

/// Queue handle wrapping a SQLite connection.
#[derive(Clone)]
pub struct SqliteQueue {
    conn: Arc<Mutex<Connection>>,
    options: QueueOptions,
}

impl SqliteQueue {
    /// Open or create the queue database at the given path.
    pub fn open<P: AsRef<Path>>(path: P, options: QueueOptions) -> Result<Self, QueueError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA busy_timeout=5000;",
        )?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            options,
        })
    }

    /// Open an in-memory queue (for testing).
    pub fn open_in_memory(options: QueueOptions) -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            options,
        })
    }

    /// One non-blocking delivery attempt.
    fn try_receive(&self) -> Result<Option<QueueMessage>, QueueError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = now_ms();

        // Park anything that has burned its delivery budget before picking
        // a candidate, so exhausted messages never get delivered again.
        let parked = tx.execute(
            "INSERT INTO dead_letters (id, body, enqueued_at, dead_lettered_at, receive_count)
             SELECT id, body, enqueued_at, ?1, receive_count FROM messages
             WHERE visible_at <= ?1 AND receive_count >= ?2",
            params![now, self.options.max_receive_count],
        )?;
        if parked > 0 {
            tx.execute(
                "DELETE FROM messages WHERE visible_at <= ?1 AND receive_count >= ?2",
                params![now, self.options.max_receive_count],
            )?;
            warn!(parked, "moved exhausted messages to the dead-letter table");
        }

        let result = tx.query_row(
            "SELECT id, body, receive_count FROM messages
             WHERE visible_at <= ?1 ORDER BY id LIMIT 1",
            params![now],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u32>(2)?,
                ))
            },
        );
        let candidate = match result {
            Ok(row) => Some(row),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        let Some((id, body, receive_count)) = candidate else {
            tx.commit()?;
            return Ok(None);
        };

        let receive_count = receive_count + 1;
        let visible_at = now + self.options.visibility_timeout.as_millis() as i64;
        tx.execute(
            "UPDATE messages SET visible_at = ?1, receive_count = ?2 WHERE id = ?3",
            params![visible_at, receive_count, id],
        )?;
        tx.commit()?;

        Ok(Some(QueueMessage {
            id: id.to_string(),
            receipt_handle: format!("{id}:{receive_count}"),
            body,
            receive_count,
        }))
    }

    /// Messages parked in the dead-letter table, oldest first.
    pub fn dead_letters(&self) -> Result<Vec<DeadLetter>, QueueError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, body, enqueued_at, dead_lettered_at, receive_count
             FROM dead_letters ORDER BY dead_lettered_at, id",
        )?;
        let letters = stmt
            .query_map([], |row| {
                Ok(DeadLetter {
                    id: row.get(0)?,
                    body: row.get(1)?,
                    enqueued_at: ms_to_datetime(row.get(2)?),
                    dead_lettered_at: ms_to_datetime(row.get(3)?),
                    receive_count: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(letters)
    }

    /// Counts by delivery state.
    pub fn counts(&self) -> Result<QueueCounts, QueueError> {
        let conn = self.conn.lock().unwrap();
        let now = now_ms();
        let (ready, in_flight) = conn.query_row(
            "SELECT
                COUNT(*) FILTER (WHERE visible_at <= ?1),
                COUNT(*) FILTER (WHERE visible_at > ?1)
             FROM messages",
            params![now],
            |row| Ok((row.get::<_, u64>(0)?, row.get::<_, u64>(1)?)),
        )?;
        let dead: u64 =
            conn.query_row("SELECT COUNT(*) FROM dead_letters", [], |row| row.get(0))?;
        Ok(QueueCounts {
            ready,
            in_flight,
            dead,
        })
    }
}

#[async_trait]
impl NotificationQueue for SqliteQueue {
    async fn send(&self, body: &str) -> Result<String, QueueError> {
        let conn = self.conn.lock().unwrap();
        let now = now_ms();
        conn.execute(
            "INSERT INTO messages (body, enqueued_at, visible_at, receive_count)
             VALUES (?1, ?2, ?2, 0)",
            params![body, now],
        )?;
        let id = conn.last_insert_rowid();
        debug!(message_id = id, "message enqueued");
        Ok(id.to_string())
    }

    async fn receive(&self) -> Result<Option<QueueMessage>, QueueError> {
        let deadline = Instant::now() + self.options.wait_time;
        loop {
            if let Some(message) = self.try_receive()? {
                debug!(
                    message_id = %message.id,
                    receive_count = message.receive_count,
                    "message delivered"
                );
                return Ok(Some(message));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let (id, generation) = parse_receipt(receipt_handle)?;
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(
            "DELETE FROM messages WHERE id = ?1 AND receive_count = ?2",
            params![id, generation],
        )?;
        if affected == 0 {
            // Distinguish an already-acknowledged message from a stale
            // receipt whose message has since been handed out again.
            let still_queued: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            if still_queued > 0 {
                return Err(QueueError::InvalidReceipt(format!(
                    "receipt {receipt_handle} is stale, message {id} was redelivered"
                )));
            }
            debug!(message_id = id, "delete for already-removed message ignored");
        }
        Ok(())
    }
}

fn parse_receipt(receipt_handle: &str) -> Result<(i64, u32), QueueError> {
    let invalid = || QueueError::InvalidReceipt(receipt_handle.to_string());
    let (id, generation) = receipt_handle.split_once(':').ok_or_else(invalid)?;
    Ok((
        id.parse().map_err(|_| invalid())?,
        generation.parse().map_err(|_| invalid())?,
    ))
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}
