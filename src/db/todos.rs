//! CRUD operations for todo records.

use chrono::Utc;
use rusqlite::{Connection, Row, params};

use super::Database;
use crate::error::StoreError;
use crate::types::{NewTodo, Todo, TodoPatch, TodoPriority, TodoStatus};

impl Database {
    /// Insert a new todo under an already-assigned id.
    ///
    /// Ids travel with the envelope, so the store takes them as given
    /// instead of allocating its own.
    pub fn insert_todo(&self, id: i64, new: &NewTodo) -> Result<Todo, StoreError> {
        self.with_conn(|conn| {
            let now = Utc::now();
            conn.execute(
                "INSERT INTO todos (id, title, description, status, priority, due_date, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id,
                    new.title,
                    new.description,
                    new.status.as_str(),
                    new.priority.as_str(),
                    new.due_date,
                    now,
                    now,
                ],
            )?;

            Ok(Todo {
                id,
                title: new.title.clone(),
                description: new.description.clone(),
                status: new.status,
                priority: new.priority,
                due_date: new.due_date,
                created_at: now,
                updated_at: now,
            })
        })
    }

    /// Fetch a todo by id.
    pub fn get_todo(&self, id: i64) -> Result<Option<Todo>, StoreError> {
        self.with_conn(|conn| get_todo_inner(conn, id))
    }

    /// Merge a field patch into an existing todo.
    ///
    /// Absent patch fields keep their stored values. Returns `None` when the
    /// id does not exist.
    pub fn update_todo(&self, id: i64, patch: &TodoPatch) -> Result<Option<Todo>, StoreError> {
        self.with_conn(|conn| {
            let Some(existing) = get_todo_inner(conn, id)? else {
                return Ok(None);
            };

            let title = patch.title.clone().unwrap_or(existing.title);
            let description = match &patch.description {
                Some(description) => description.clone(),
                None => existing.description,
            };
            let status = patch.status.unwrap_or(existing.status);
            let priority = patch.priority.unwrap_or(existing.priority);
            let due_date = match patch.due_date {
                Some(due_date) => due_date,
                None => existing.due_date,
            };
            let now = Utc::now();

            conn.execute(
                "UPDATE todos
                 SET title = ?1, description = ?2, status = ?3, priority = ?4,
                     due_date = ?5, updated_at = ?6
                 WHERE id = ?7",
                params![
                    title,
                    description,
                    status.as_str(),
                    priority.as_str(),
                    due_date,
                    now,
                    id,
                ],
            )?;

            Ok(Some(Todo {
                id,
                title,
                description,
                status,
                priority,
                due_date,
                created_at: existing.created_at,
                updated_at: now,
            }))
        })
    }

    /// Delete a todo. Returns whether a row was actually removed.
    pub fn delete_todo(&self, id: i64) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let affected = conn.execute("DELETE FROM todos WHERE id = ?1", params![id])?;
            Ok(affected > 0)
        })
    }

    /// List all todos, oldest id first.
    pub fn list_todos(&self) -> Result<Vec<Todo>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, description, status, priority, due_date, created_at, updated_at
                 FROM todos ORDER BY id",
            )?;
            let todos = stmt
                .query_map([], parse_todo_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(todos)
        })
    }

    /// Number of stored todos.
    pub fn todo_count(&self) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM todos", [], |row| row.get(0))?;
            Ok(count)
        })
    }
}

fn get_todo_inner(conn: &Connection, id: i64) -> Result<Option<Todo>, StoreError> {
    let result = conn.query_row(
        "SELECT id, title, description, status, priority, due_date, created_at, updated_at
         FROM todos WHERE id = ?1",
        params![id],
        parse_todo_row,
    );

    match result {
        Ok(todo) => Ok(Some(todo)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn parse_todo_row(row: &Row) -> rusqlite::Result<Todo> {
    let status: String = row.get("status")?;
    let priority: String = row.get("priority")?;

    Ok(Todo {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        status: TodoStatus::parse(&status).unwrap_or_default(),
        priority: TodoPriority::parse(&priority).unwrap_or_default(),
        due_date: row.get("due_date")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
