//! Command-line interface definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Queue-backed write pipeline for todo records.
#[derive(Parser, Debug)]
#[command(name = "todo-pipeline", version, about)]
pub struct Cli {
    /// Path to a config file (default: todo-pipeline/config.yaml).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the store database path.
    #[arg(short, long, global = true)]
    pub database: Option<PathBuf>,

    /// Override the queue database path.
    #[arg(long, global = true)]
    pub queue: Option<PathBuf>,

    /// Override the Redis URL for the read cache.
    #[arg(long, global = true)]
    pub redis_url: Option<String>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output: 0/off, 1/stdout, 2/stderr, or a filename.
    #[arg(short, long, global = true, default_value = "2")]
    pub log: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the consumer loop (the default when no command is given).
    Serve,

    /// Queue a mutation without waiting for it to apply.
    Submit {
        #[command(subcommand)]
        action: SubmitAction,
    },

    /// List todos via the cache-then-store read path.
    List,

    /// Fetch a single todo by id.
    Get { id: i64 },

    /// Show messages parked in the dead-letter table.
    Dlq,
}

#[derive(Subcommand, Debug)]
pub enum SubmitAction {
    /// Queue a todo_created envelope.
    Create {
        #[arg(long)]
        title: String,

        #[arg(long)]
        description: Option<String>,

        /// pending, in-progress or completed (default: pending).
        #[arg(long)]
        status: Option<String>,

        /// low, medium or high (default: medium).
        #[arg(long)]
        priority: Option<String>,

        /// RFC 3339 timestamp.
        #[arg(long)]
        due_date: Option<String>,
    },

    /// Queue a todo_updated envelope carrying only the given fields.
    Update {
        id: i64,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// Clear the description.
        #[arg(long, conflicts_with = "description")]
        clear_description: bool,

        /// pending, in-progress or completed.
        #[arg(long)]
        status: Option<String>,

        /// low, medium or high.
        #[arg(long)]
        priority: Option<String>,

        /// RFC 3339 timestamp.
        #[arg(long)]
        due_date: Option<String>,

        /// Clear the due date.
        #[arg(long, conflicts_with = "due_date")]
        clear_due_date: bool,
    },

    /// Queue a todo_deleted envelope.
    Delete { id: i64 },
}
