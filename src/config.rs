//! Configuration for the pipeline binaries.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::SNAPSHOT_KEY;
use crate::consumer::ConsumerOptions;
use crate::queue::QueueOptions;
use crate::retry::RetryPolicy;

/// Top-level configuration, usually loaded from `todo-pipeline/config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
}

/// Entity store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the todos database.
    #[serde(default = "default_store_db_path")]
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_store_db_path(),
        }
    }
}

fn default_store_db_path() -> PathBuf {
    PathBuf::from("todo-pipeline/todos.db")
}

/// Read cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Redis connection URL.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Key the snapshot is stored under.
    #[serde(default = "default_snapshot_key")]
    pub snapshot_key: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            snapshot_key: default_snapshot_key(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_snapshot_key() -> String {
    SNAPSHOT_KEY.to_string()
}

/// Notification queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Path to the queue database.
    #[serde(default = "default_queue_db_path")]
    pub db_path: PathBuf,

    /// Seconds a delivered message stays invisible before redelivery.
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_seconds: u64,

    /// Deliveries before a message is dead-lettered.
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,

    /// Seconds `receive` long-polls before reporting an empty queue.
    #[serde(default = "default_wait_time")]
    pub wait_time_seconds: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            db_path: default_queue_db_path(),
            visibility_timeout_seconds: default_visibility_timeout(),
            max_receive_count: default_max_receive_count(),
            wait_time_seconds: default_wait_time(),
        }
    }
}

impl QueueConfig {
    /// Delivery options for the queue backend.
    pub fn options(&self) -> QueueOptions {
        QueueOptions {
            visibility_timeout: Duration::from_secs(self.visibility_timeout_seconds),
            max_receive_count: self.max_receive_count,
            wait_time: Duration::from_secs(self.wait_time_seconds),
        }
    }
}

fn default_queue_db_path() -> PathBuf {
    PathBuf::from("todo-pipeline/queue.db")
}

fn default_visibility_timeout() -> u64 {
    60
}

fn default_max_receive_count() -> u32 {
    3
}

fn default_wait_time() -> u64 {
    20
}

/// Consumer loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Attempts for the cache refresh step, first try included.
    #[serde(default = "default_refresh_attempts")]
    pub cache_refresh_attempts: u32,

    /// Milliseconds between cache refresh attempts.
    #[serde(default = "default_refresh_delay_ms")]
    pub cache_refresh_delay_ms: u64,

    /// Seconds to back off after a queue backend failure.
    #[serde(default = "default_error_backoff")]
    pub error_backoff_seconds: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            cache_refresh_attempts: default_refresh_attempts(),
            cache_refresh_delay_ms: default_refresh_delay_ms(),
            error_backoff_seconds: default_error_backoff(),
        }
    }
}

impl ConsumerConfig {
    pub fn options(&self) -> ConsumerOptions {
        ConsumerOptions {
            refresh_retry: RetryPolicy::new(
                self.cache_refresh_attempts,
                Duration::from_millis(self.cache_refresh_delay_ms),
            ),
            error_backoff: Duration::from_secs(self.error_backoff_seconds),
        }
    }
}

fn default_refresh_attempts() -> u32 {
    3
}

fn default_refresh_delay_ms() -> u64 {
    1000
}

fn default_error_backoff() -> u64 {
    5
}

impl Config {
    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load from the default location or fall back to defaults, then apply
    /// environment overrides.
    pub fn load_or_default() -> Self {
        let mut config = Self::load("todo-pipeline/config.yaml").unwrap_or_default();
        config.apply_env_overrides();
        config
    }

    /// Apply `TODO_PIPELINE_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(db_path) = std::env::var("TODO_PIPELINE_DB_PATH") {
            self.store.db_path = PathBuf::from(db_path);
        }
        if let Ok(queue_path) = std::env::var("TODO_PIPELINE_QUEUE_PATH") {
            self.queue.db_path = PathBuf::from(queue_path);
        }
        if let Ok(redis_url) = std::env::var("TODO_PIPELINE_REDIS_URL") {
            self.cache.redis_url = redis_url;
        }
        if let Ok(key) = std::env::var("TODO_PIPELINE_SNAPSHOT_KEY") {
            self.cache.snapshot_key = key;
        }
    }

    /// Ensure the parent directories for both database files exist.
    pub fn ensure_data_dirs(&self) -> Result<()> {
        for path in [&self.store.db_path, &self.queue.db_path] {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }
        Ok(())
    }
}
