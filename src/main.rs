//! todo-pipeline binary: consumer service plus a submit/read CLI.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::Parser;
use std::fs::OpenOptions;
use std::sync::Arc;
use todo_pipeline::cache::{MemoryCache, RedisCache, SnapshotCache};
use todo_pipeline::cli::{Cli, Command, SubmitAction};
use todo_pipeline::config::Config;
use todo_pipeline::consumer::Consumer;
use todo_pipeline::db::Database;
use todo_pipeline::envelope;
use todo_pipeline::producer::Producer;
use todo_pipeline::queue::SqliteQueue;
use todo_pipeline::reads;
use todo_pipeline::types::{NewTodo, TodoPatch, TodoPriority, TodoStatus};
use tokio::sync::watch;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on --log option
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    match cli.log.as_str() {
        "0" | "off" => {
            // No logging
        }
        "1" | "stdout" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "2" | "stderr" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        filename => {
            // Log to file (append mode)
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(filename)?;
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    let mut config = match &cli.config {
        Some(path) => {
            let mut config = Config::load(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?;
            config.apply_env_overrides();
            config
        }
        None => Config::load_or_default(),
    };

    // CLI flags win over both the file and the environment.
    if let Some(database) = &cli.database {
        config.store.db_path = database.clone();
    }
    if let Some(queue_path) = &cli.queue {
        config.queue.db_path = queue_path.clone();
    }
    if let Some(redis_url) = &cli.redis_url {
        config.cache.redis_url = redis_url.clone();
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Submit { action } => submit(config, action).await,
        Command::List => list(config).await,
        Command::Get { id } => get(config, id).await,
        Command::Dlq => dlq(config).await,
    }
}

/// Run the consumer until Ctrl-C.
async fn serve(config: Config) -> Result<()> {
    config.ensure_data_dirs()?;

    let db = Database::open(&config.store.db_path)
        .with_context(|| format!("failed to open store at {}", config.store.db_path.display()))?;
    let queue = Arc::new(
        SqliteQueue::open(&config.queue.db_path, config.queue.options()).with_context(|| {
            format!("failed to open queue at {}", config.queue.db_path.display())
        })?,
    );

    let cache = RedisCache::connect(&config.cache.redis_url, config.cache.snapshot_key.clone())?;
    // Fail at startup rather than on the first message.
    cache
        .ping()
        .await
        .with_context(|| format!("redis unreachable at {}", config.cache.redis_url))?;
    let cache: Arc<dyn SnapshotCache> = Arc::new(cache);

    let consumer = Consumer::new(db, cache, queue, config.consumer.options());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_task = tokio::spawn(async move { consumer.run(shutdown_rx).await });

    info!(
        store = %config.store.db_path.display(),
        queue = %config.queue.db_path.display(),
        "pipeline consumer running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    consumer_task.await?;

    Ok(())
}

/// Queue one mutation and print the receipt.
async fn submit(config: Config, action: SubmitAction) -> Result<()> {
    config.ensure_data_dirs()?;
    let queue = Arc::new(SqliteQueue::open(
        &config.queue.db_path,
        config.queue.options(),
    )?);
    let producer = Producer::new(queue);

    let receipt = match action {
        SubmitAction::Create {
            title,
            description,
            status,
            priority,
            due_date,
        } => {
            let new = NewTodo {
                title,
                description,
                status: parse_status_arg(status.as_deref())?.unwrap_or_default(),
                priority: parse_priority_arg(priority.as_deref())?.unwrap_or_default(),
                due_date: parse_due_date_arg(due_date.as_deref())?,
            };
            producer.submit_create(&new).await?
        }
        SubmitAction::Update {
            id,
            title,
            description,
            clear_description,
            status,
            priority,
            due_date,
            clear_due_date,
        } => {
            let patch = TodoPatch {
                title,
                description: if clear_description {
                    Some(None)
                } else {
                    description.map(Some)
                },
                status: parse_status_arg(status.as_deref())?,
                priority: parse_priority_arg(priority.as_deref())?,
                due_date: if clear_due_date {
                    Some(None)
                } else {
                    parse_due_date_arg(due_date.as_deref())?.map(Some)
                },
            };
            if patch.is_empty() {
                bail!("nothing to update, pass at least one field");
            }
            producer.submit_update(id, &patch).await?
        }
        SubmitAction::Delete { id } => producer.submit_delete(id).await?,
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "message": "queued",
            "todo_id": receipt.todo_id,
            "message_id": receipt.message_id,
        }))?
    );
    Ok(())
}

async fn list(config: Config) -> Result<()> {
    let (db, cache) = open_read_path(&config)?;
    let todos = reads::list_todos(cache.as_ref(), &db).await?;
    println!("{}", serde_json::to_string_pretty(&todos)?);
    Ok(())
}

async fn get(config: Config, id: i64) -> Result<()> {
    let (db, cache) = open_read_path(&config)?;
    match reads::get_todo(cache.as_ref(), &db, id).await? {
        Some(todo) => println!("{}", serde_json::to_string_pretty(&todo)?),
        None => bail!("todo {id} not found"),
    }
    Ok(())
}

async fn dlq(config: Config) -> Result<()> {
    config.ensure_data_dirs()?;
    let queue = SqliteQueue::open(&config.queue.db_path, config.queue.options())?;
    let letters = queue.dead_letters()?;
    if letters.is_empty() {
        println!("dead-letter table is empty");
        return Ok(());
    }
    for letter in letters {
        println!(
            "{}  receives={}  enqueued={}  body={}",
            letter.dead_lettered_at.to_rfc3339(),
            letter.receive_count,
            letter.enqueued_at.to_rfc3339(),
            letter.body
        );
    }
    Ok(())
}

/// Open the store and the cache for the read commands.
///
/// An unreachable cache is not fatal here; reads fall through to the store.
fn open_read_path(config: &Config) -> Result<(Database, Arc<dyn SnapshotCache>)> {
    let db = Database::open(&config.store.db_path)
        .with_context(|| format!("failed to open store at {}", config.store.db_path.display()))?;
    let cache: Arc<dyn SnapshotCache> =
        match RedisCache::connect(&config.cache.redis_url, config.cache.snapshot_key.clone()) {
            Ok(cache) => Arc::new(cache),
            Err(e) => {
                warn!(error = %e, "cache unavailable, reads will hit the store");
                Arc::new(MemoryCache::new())
            }
        };
    Ok((db, cache))
}

fn parse_status_arg(value: Option<&str>) -> Result<Option<TodoStatus>> {
    value
        .map(|s| {
            TodoStatus::parse(s).ok_or_else(|| {
                anyhow::anyhow!("invalid status {s:?}, expected pending, in-progress or completed")
            })
        })
        .transpose()
}

fn parse_priority_arg(value: Option<&str>) -> Result<Option<TodoPriority>> {
    value
        .map(|s| {
            TodoPriority::parse(s)
                .ok_or_else(|| anyhow::anyhow!("invalid priority {s:?}, expected low, medium or high"))
        })
        .transpose()
}

fn parse_due_date_arg(value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|s| {
            envelope::parse_timestamp(s)
                .ok_or_else(|| anyhow::anyhow!("invalid due date {s:?}, expected ISO 8601"))
        })
        .transpose()
}
