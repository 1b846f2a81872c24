//! Integration tests for the SQLite notification queue.
//!
//! Visibility timeouts are shrunk to tens of milliseconds so redelivery and
//! dead-lettering can be exercised in real time.

use std::time::Duration;
use todo_pipeline::error::QueueError;
use todo_pipeline::queue::{NotificationQueue, QueueOptions, SqliteQueue};

fn fast_options() -> QueueOptions {
    QueueOptions {
        visibility_timeout: Duration::from_millis(80),
        max_receive_count: 3,
        wait_time: Duration::ZERO,
    }
}

/// Helper to create a fresh in-memory queue for testing.
fn setup_queue(options: QueueOptions) -> SqliteQueue {
    SqliteQueue::open_in_memory(options).expect("Failed to create in-memory queue")
}

mod delivery_tests {
    use super::*;

    #[tokio::test]
    async fn send_then_receive_round_trips_the_body() {
        let queue = setup_queue(fast_options());

        let id = queue.send("hello").await.expect("Failed to send");
        let message = queue
            .receive()
            .await
            .expect("Failed to receive")
            .expect("message expected");

        assert_eq!(message.id, id);
        assert_eq!(message.body, "hello");
        assert_eq!(message.receive_count, 1);
    }

    #[tokio::test]
    async fn receive_returns_none_when_empty() {
        let queue = setup_queue(fast_options());
        assert!(queue.receive().await.expect("Failed to receive").is_none());
    }

    #[tokio::test]
    async fn messages_deliver_oldest_first() {
        let queue = setup_queue(fast_options());
        queue.send("first").await.expect("Failed to send");
        queue.send("second").await.expect("Failed to send");

        let a = queue.receive().await.unwrap().expect("first delivery");
        let b = queue.receive().await.unwrap().expect("second delivery");
        assert_eq!(a.body, "first");
        assert_eq!(b.body, "second");
    }

    #[tokio::test]
    async fn delivered_messages_are_invisible_until_the_timeout() {
        let queue = setup_queue(fast_options());
        queue.send("one").await.expect("Failed to send");

        let first = queue.receive().await.unwrap().expect("first delivery");
        assert!(queue.receive().await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(120)).await;
        let second = queue.receive().await.unwrap().expect("redelivery");
        assert_eq!(second.id, first.id);
        assert_eq!(second.body, "one");
        assert_eq!(second.receive_count, 2);
        assert_ne!(second.receipt_handle, first.receipt_handle);
    }

    #[tokio::test]
    async fn long_poll_picks_up_a_late_message() {
        let queue = setup_queue(QueueOptions {
            wait_time: Duration::from_secs(2),
            ..fast_options()
        });

        let sender = {
            let queue = queue.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(150)).await;
                queue.send("late").await.expect("Failed to send");
            })
        };

        let message = queue
            .receive()
            .await
            .expect("Failed to receive")
            .expect("late message should arrive within the wait");
        assert_eq!(message.body, "late");
        sender.await.expect("sender task failed");
    }
}

mod ack_tests {
    use super::*;

    #[tokio::test]
    async fn delete_acknowledges_for_good() {
        let queue = setup_queue(fast_options());
        queue.send("done").await.expect("Failed to send");

        let message = queue.receive().await.unwrap().expect("delivery");
        queue
            .delete(&message.receipt_handle)
            .await
            .expect("Failed to delete");

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(queue.receive().await.unwrap().is_none());

        let counts = queue.counts().expect("Failed to count");
        assert_eq!(counts.ready, 0);
        assert_eq!(counts.in_flight, 0);
        assert_eq!(counts.dead, 0);
    }

    #[tokio::test]
    async fn deleting_twice_is_harmless() {
        let queue = setup_queue(fast_options());
        queue.send("once").await.expect("Failed to send");

        let message = queue.receive().await.unwrap().expect("delivery");
        queue.delete(&message.receipt_handle).await.expect("first delete");
        queue
            .delete(&message.receipt_handle)
            .await
            .expect("second delete should be a no-op");
    }

    #[tokio::test]
    async fn stale_receipt_cannot_delete_a_redelivered_message() {
        let queue = setup_queue(fast_options());
        queue.send("contested").await.expect("Failed to send");

        let first = queue.receive().await.unwrap().expect("first delivery");
        tokio::time::sleep(Duration::from_millis(120)).await;
        let second = queue.receive().await.unwrap().expect("redelivery");

        let err = queue.delete(&first.receipt_handle).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidReceipt(_)));

        queue
            .delete(&second.receipt_handle)
            .await
            .expect("current receipt should delete");
    }

    #[tokio::test]
    async fn garbage_receipts_are_rejected() {
        let queue = setup_queue(fast_options());
        let err = queue.delete("not-a-receipt").await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidReceipt(_)));
    }
}

mod persistence_tests {
    use super::*;
    use tempfile::TempDir;

    /// Create a fresh temporary directory for each test.
    fn setup_dir() -> TempDir {
        TempDir::new().expect("Failed to create temp directory")
    }

    #[tokio::test]
    async fn messages_survive_reopening_the_queue() {
        let dir = setup_dir();
        let path = dir.path().join("queue.db");

        {
            let queue = SqliteQueue::open(&path, fast_options()).expect("Failed to open queue");
            queue.send("persisted").await.expect("Failed to send");
        }

        let queue = SqliteQueue::open(&path, fast_options()).expect("Failed to reopen queue");
        let message = queue
            .receive()
            .await
            .expect("Failed to receive")
            .expect("message should survive a restart");
        assert_eq!(message.body, "persisted");
    }
}

mod dead_letter_tests {
    use super::*;

    #[tokio::test]
    async fn exhausted_messages_move_to_the_dead_letter_table() {
        let queue = setup_queue(QueueOptions {
            visibility_timeout: Duration::from_millis(30),
            max_receive_count: 2,
            wait_time: Duration::ZERO,
        });
        queue.send("poison").await.expect("Failed to send");

        for attempt in 1..=2u32 {
            let message = queue.receive().await.unwrap().expect("delivery");
            assert_eq!(message.receive_count, attempt);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        // Budget burned: the next receive parks it instead of delivering.
        assert!(queue.receive().await.unwrap().is_none());

        let letters = queue.dead_letters().expect("Failed to read dead letters");
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].body, "poison");
        assert_eq!(letters[0].receive_count, 2);

        let counts = queue.counts().expect("Failed to count");
        assert_eq!(counts.ready, 0);
        assert_eq!(counts.in_flight, 0);
        assert_eq!(counts.dead, 1);
    }

    #[tokio::test]
    async fn acknowledged_messages_never_dead_letter() {
        let queue = setup_queue(QueueOptions {
            visibility_timeout: Duration::from_millis(30),
            max_receive_count: 2,
            wait_time: Duration::ZERO,
        });
        queue.send("retried then fine").await.expect("Failed to send");

        let _ = queue.receive().await.unwrap().expect("first delivery");
        tokio::time::sleep(Duration::from_millis(50)).await;
        let message = queue.receive().await.unwrap().expect("redelivery");
        queue
            .delete(&message.receipt_handle)
            .await
            .expect("Failed to delete");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(queue.receive().await.unwrap().is_none());
        assert!(queue.dead_letters().expect("Failed to read").is_empty());
    }

    #[tokio::test]
    async fn counts_split_ready_and_in_flight() {
        let queue = setup_queue(fast_options());
        queue.send("a").await.expect("Failed to send");
        queue.send("b").await.expect("Failed to send");

        let _ = queue.receive().await.unwrap().expect("delivery");

        let counts = queue.counts().expect("Failed to count");
        assert_eq!(counts.ready, 1);
        assert_eq!(counts.in_flight, 1);
        assert_eq!(counts.dead, 0);
    }
}
