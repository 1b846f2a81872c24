//! Queue-backed write pipeline for todo records.
//!
//! Producers enqueue flat JSON mutation envelopes; a single consumer drains
//! the queue, applies each mutation to the SQLite entity store, and rebuilds
//! the Redis read snapshot. Delivery is at-least-once end to end, which the
//! consumer compensates for with idempotent applies.

pub mod cache;
pub mod cli;
pub mod config;
pub mod consumer;
pub mod db;
pub mod envelope;
pub mod error;
pub mod producer;
pub mod queue;
pub mod reads;
pub mod retry;
pub mod types;
