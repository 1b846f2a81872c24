//! Core domain types for the todo write pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Workflow state of a todo record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TodoStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl TodoStatus {
    /// All variants, in display order.
    pub const ALL: [TodoStatus; 3] = [
        TodoStatus::Pending,
        TodoStatus::InProgress,
        TodoStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TodoStatus::Pending => "pending",
            TodoStatus::InProgress => "in-progress",
            TodoStatus::Completed => "completed",
        }
    }

    /// Parse a wire value. Returns `None` for anything outside the closed set.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TodoStatus::Pending),
            "in-progress" => Some(TodoStatus::InProgress),
            "completed" => Some(TodoStatus::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for TodoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority of a todo record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TodoPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl TodoPriority {
    pub const ALL: [TodoPriority; 3] =
        [TodoPriority::Low, TodoPriority::Medium, TodoPriority::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            TodoPriority::Low => "low",
            TodoPriority::Medium => "medium",
            TodoPriority::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(TodoPriority::Low),
            "medium" => Some(TodoPriority::Medium),
            "high" => Some(TodoPriority::High),
            _ => None,
        }
    }
}

impl fmt::Display for TodoPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A todo record as stored and as served to readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Todo {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: TodoStatus,
    pub priority: TodoPriority,
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated payload of a `todo_created` envelope, with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTodo {
    pub title: String,
    pub description: Option<String>,
    pub status: TodoStatus,
    pub priority: TodoPriority,
    pub due_date: Option<DateTime<Utc>>,
}

impl NewTodo {
    /// A minimal payload with just a title; everything else defaulted.
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            status: TodoStatus::default(),
            priority: TodoPriority::default(),
            due_date: None,
        }
    }
}

/// Field-level changes carried by a `todo_updated` envelope.
///
/// The outer `Option` distinguishes "field absent, leave unchanged" from
/// "field present". For the nullable columns the inner `Option` then
/// distinguishes a new value from an explicit clear (JSON `null`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TodoPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<TodoStatus>,
    pub priority: Option<TodoPriority>,
    pub due_date: Option<Option<DateTime<Utc>>>,
}

impl TodoPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.due_date.is_none()
    }
}

/// Whole-collection snapshot held by the read cache.
///
/// `cached_at` serializes as `_cached_at` so readers can tell how stale the
/// snapshot is without consulting the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoSnapshot {
    pub todos: Vec<Todo>,
    #[serde(rename = "_cached_at")]
    pub cached_at: DateTime<Utc>,
}

impl TodoSnapshot {
    pub fn new(todos: Vec<Todo>) -> Self {
        Self {
            todos,
            cached_at: Utc::now(),
        }
    }

    /// Find a todo in the snapshot by id.
    pub fn find(&self, id: i64) -> Option<&Todo> {
        self.todos.iter().find(|t| t.id == id)
    }
}

/// What applying an envelope against the store amounted to.
///
/// Duplicate deliveries collapse to `Noop`, which is still a success: the
/// message is acknowledged either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The store was mutated.
    Applied,
    /// The store was already in the requested state.
    Noop,
}
