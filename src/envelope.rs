//! Wire contract for queued mutation envelopes.
//!
//! Decoding is deliberately split in two stages. [`RawEnvelope`] captures the
//! body as the raw JSON object so that anything object-shaped gets past
//! decode; [`RawEnvelope::validate`] then enforces the contract and reports
//! semantic problems (wrong types, unknown actions, stray fields) as
//! [`ValidationError`]s. Only bodies that are not JSON objects at all fail
//! with [`DecodeError`].

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use crate::error::{DecodeError, PipelineError, ValidationError};
use crate::types::{NewTodo, TodoPatch, TodoPriority, TodoStatus};

pub const ACTION_CREATED: &str = "todo_created";
pub const ACTION_UPDATED: &str = "todo_updated";
pub const ACTION_DELETED: &str = "todo_deleted";

/// Envelope fields exactly as they arrived, before validation.
///
/// Holds the body as the raw JSON object rather than typed fields: an
/// explicit `null` must stay distinguishable from an absent key, and
/// deserializing into optional fields collapses both to `None`. Producers
/// are allowed the `todoId` and `type` spellings for the two routing fields.
#[derive(Debug)]
pub struct RawEnvelope {
    fields: Map<String, Value>,
}

/// A validated mutation ready to apply against the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Create(NewTodo),
    Update(TodoPatch),
    Delete,
}

impl Mutation {
    /// Wire name of the action, for logs.
    pub fn action(&self) -> &'static str {
        match self {
            Mutation::Create(_) => ACTION_CREATED,
            Mutation::Update(_) => ACTION_UPDATED,
            Mutation::Delete => ACTION_DELETED,
        }
    }
}

/// A queue message after decode and validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub todo_id: i64,
    pub mutation: Mutation,
}

impl Envelope {
    /// Decode and validate a raw message body in one step.
    pub fn parse(body: &str) -> Result<Self, PipelineError> {
        let raw = RawEnvelope::decode(body)?;
        Ok(raw.validate()?)
    }
}

impl RawEnvelope {
    pub fn decode(body: &str) -> Result<Self, DecodeError> {
        let fields = serde_json::from_str(body)?;
        Ok(RawEnvelope { fields })
    }

    /// Remove a field by its canonical name, falling back to the alternate
    /// wire spelling. When both spellings are present the canonical one wins
    /// and the leftover alias trips the unknown-field check.
    fn take(&mut self, field: &str, alias: &str) -> Option<Value> {
        self.fields
            .remove(field)
            .or_else(|| self.fields.remove(alias))
    }

    /// Enforce the envelope contract and produce a typed mutation.
    ///
    /// Checks run in a fixed order: routing fields first (`todo_id`, then
    /// `action`), then unknown fields, then the action's payload.
    pub fn validate(mut self) -> Result<Envelope, ValidationError> {
        let todo_id = parse_todo_id(self.take("todo_id", "todoId"))?;
        let action = parse_action(self.take("action", "type"))?;

        // Producer-side enqueue time rides along as metadata, never validated.
        self.fields.remove("timestamp");
        let title = self.fields.remove("title");
        let description = self.fields.remove("description");
        let status = self.fields.remove("status");
        let priority = self.fields.remove("priority");
        let due_date = self.fields.remove("due_date");
        if let Some(field) = self.fields.keys().next() {
            return Err(ValidationError::UnknownField {
                field: field.clone(),
            });
        }

        let mutation = match action {
            ActionKind::Created => {
                let title = match title {
                    // An explicit null is as useless as an absent title here.
                    None | Some(Value::Null) => {
                        return Err(ValidationError::missing("title"));
                    }
                    Some(Value::String(s)) if !s.trim().is_empty() => s,
                    Some(Value::String(_)) => {
                        return Err(ValidationError::invalid("title", "must not be empty"));
                    }
                    Some(_) => {
                        return Err(ValidationError::invalid("title", "must be a string"));
                    }
                };
                Mutation::Create(NewTodo {
                    title,
                    description: parse_description(description)?.flatten(),
                    status: parse_status(status)?.unwrap_or_default(),
                    priority: parse_priority(priority)?.unwrap_or_default(),
                    due_date: parse_due_date(due_date)?.flatten(),
                })
            }
            ActionKind::Updated => {
                let title = match title {
                    None => None,
                    Some(Value::Null) => {
                        return Err(ValidationError::invalid("title", "must not be null"));
                    }
                    Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
                    Some(Value::String(_)) => {
                        return Err(ValidationError::invalid("title", "must not be empty"));
                    }
                    Some(_) => {
                        return Err(ValidationError::invalid("title", "must be a string"));
                    }
                };
                Mutation::Update(TodoPatch {
                    title,
                    description: parse_description(description)?,
                    status: parse_status(status)?,
                    priority: parse_priority(priority)?,
                    due_date: parse_due_date(due_date)?,
                })
            }
            // Deletes route on todo_id alone; any payload fields are ignored.
            ActionKind::Deleted => Mutation::Delete,
        };

        Ok(Envelope { todo_id, mutation })
    }
}

enum ActionKind {
    Created,
    Updated,
    Deleted,
}

fn parse_todo_id(value: Option<Value>) -> Result<i64, ValidationError> {
    match value {
        None | Some(Value::Null) => Err(ValidationError::missing("todo_id")),
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| ValidationError::invalid("todo_id", format!("must be an integer (got {n})"))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| ValidationError::invalid("todo_id", format!("must be an integer (got {s:?})"))),
        Some(other) => Err(ValidationError::invalid(
            "todo_id",
            format!("must be an integer (got {other})"),
        )),
    }
}

fn parse_action(value: Option<Value>) -> Result<ActionKind, ValidationError> {
    let action = match value {
        None | Some(Value::Null) => return Err(ValidationError::missing("action")),
        Some(Value::String(s)) => s,
        Some(_) => return Err(ValidationError::invalid("action", "must be a string")),
    };
    match action.as_str() {
        ACTION_CREATED => Ok(ActionKind::Created),
        ACTION_UPDATED => Ok(ActionKind::Updated),
        ACTION_DELETED => Ok(ActionKind::Deleted),
        _ => Err(ValidationError::UnknownAction { action }),
    }
}

fn parse_description(value: Option<Value>) -> Result<Option<Option<String>>, ValidationError> {
    match value {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(None)),
        Some(Value::String(s)) => Ok(Some(Some(s))),
        Some(_) => Err(ValidationError::invalid(
            "description",
            "must be a string or null",
        )),
    }
}

fn parse_status(value: Option<Value>) -> Result<Option<TodoStatus>, ValidationError> {
    match value {
        None => Ok(None),
        // The column is non-nullable, so null is a bad value here, not a clear.
        Some(Value::Null) => Err(ValidationError::invalid("status", "must not be null")),
        Some(Value::String(s)) => TodoStatus::parse(&s).map(Some).ok_or_else(|| {
            ValidationError::invalid(
                "status",
                format!("must be one of pending, in-progress, completed (got {s:?})"),
            )
        }),
        Some(_) => Err(ValidationError::invalid(
            "status",
            "must be one of pending, in-progress, completed",
        )),
    }
}

fn parse_priority(value: Option<Value>) -> Result<Option<TodoPriority>, ValidationError> {
    match value {
        None => Ok(None),
        Some(Value::Null) => Err(ValidationError::invalid("priority", "must not be null")),
        Some(Value::String(s)) => TodoPriority::parse(&s).map(Some).ok_or_else(|| {
            ValidationError::invalid(
                "priority",
                format!("must be one of low, medium, high (got {s:?})"),
            )
        }),
        Some(_) => Err(ValidationError::invalid(
            "priority",
            "must be one of low, medium, high",
        )),
    }
}

/// Parse a wire timestamp. Accepts RFC 3339, or an offset-free ISO 8601
/// timestamp which is read as UTC (the shape producers emit for `due_date`).
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn parse_due_date(value: Option<Value>) -> Result<Option<Option<DateTime<Utc>>>, ValidationError> {
    match value {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(None)),
        Some(Value::String(s)) => match parse_timestamp(&s) {
            Some(dt) => Ok(Some(Some(dt))),
            None => Err(ValidationError::invalid(
                "due_date",
                format!("not an ISO 8601 timestamp (got {s:?})"),
            )),
        },
        Some(_) => Err(ValidationError::invalid(
            "due_date",
            "must be an ISO 8601 timestamp or null",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn validate(body: &str) -> Result<Envelope, ValidationError> {
        RawEnvelope::decode(body)
            .expect("body should decode")
            .validate()
    }

    #[test]
    fn rejects_bodies_that_are_not_json() {
        assert!(RawEnvelope::decode("not json at all").is_err());
        assert!(RawEnvelope::decode("{\"todo_id\": ").is_err());
    }

    #[test]
    fn rejects_bodies_that_are_not_objects() {
        assert!(RawEnvelope::decode("[1, 2, 3]").is_err());
        assert!(RawEnvelope::decode("42").is_err());
    }

    #[test]
    fn validates_a_full_create_envelope() {
        let envelope = validate(
            r#"{
                "todo_id": 7,
                "action": "todo_created",
                "timestamp": "2025-03-01T09:00:00+00:00",
                "title": "Write report",
                "description": "Q1 numbers",
                "status": "in-progress",
                "priority": "high",
                "due_date": "2025-03-15T17:00:00+00:00"
            }"#,
        )
        .unwrap();

        assert_eq!(envelope.todo_id, 7);
        let Mutation::Create(new) = envelope.mutation else {
            panic!("expected a create mutation");
        };
        assert_eq!(new.title, "Write report");
        assert_eq!(new.description.as_deref(), Some("Q1 numbers"));
        assert_eq!(new.status, TodoStatus::InProgress);
        assert_eq!(new.priority, TodoPriority::High);
        assert!(new.due_date.is_some());
    }

    #[test]
    fn create_defaults_status_and_priority() {
        let envelope =
            validate(r#"{"todo_id": 1, "action": "todo_created", "title": "Buy milk"}"#).unwrap();
        let Mutation::Create(new) = envelope.mutation else {
            panic!("expected a create mutation");
        };
        assert_eq!(new.status, TodoStatus::Pending);
        assert_eq!(new.priority, TodoPriority::Medium);
        assert_eq!(new.description, None);
        assert_eq!(new.due_date, None);
    }

    #[test]
    fn create_accepts_explicit_null_optionals() {
        let envelope = validate(
            r#"{"todo_id": 1, "action": "todo_created", "title": "x",
                "description": null, "due_date": null}"#,
        )
        .unwrap();
        let Mutation::Create(new) = envelope.mutation else {
            panic!("expected a create mutation");
        };
        assert_eq!(new.description, None);
        assert_eq!(new.due_date, None);
    }

    #[test]
    fn accepts_alias_spellings_for_routing_fields() {
        let envelope =
            validate(r#"{"todoId": 3, "type": "todo_deleted"}"#).unwrap();
        assert_eq!(envelope.todo_id, 3);
        assert_eq!(envelope.mutation, Mutation::Delete);
    }

    #[test]
    fn flags_a_routing_field_sent_under_both_spellings() {
        let err = validate(r#"{"todo_id": 1, "todoId": 2, "action": "todo_deleted"}"#)
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownField {
                field: "todoId".to_string()
            }
        );
    }

    #[test]
    fn coerces_string_todo_id() {
        let envelope =
            validate(r#"{"todo_id": "42", "action": "todo_deleted"}"#).unwrap();
        assert_eq!(envelope.todo_id, 42);
    }

    #[test]
    fn rejects_fractional_todo_id() {
        let err = validate(r#"{"todo_id": 1.5, "action": "todo_deleted"}"#).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { field: "todo_id", .. }));
    }

    #[test]
    fn rejects_missing_todo_id() {
        let err = validate(r#"{"action": "todo_created", "title": "x"}"#).unwrap_err();
        assert_eq!(err, ValidationError::missing("todo_id"));

        let err = validate(r#"{"todo_id": null, "action": "todo_created", "title": "x"}"#)
            .unwrap_err();
        assert_eq!(err, ValidationError::missing("todo_id"));
    }

    #[test]
    fn rejects_missing_action() {
        let err = validate(r#"{"todo_id": 1, "title": "x"}"#).unwrap_err();
        assert_eq!(err, ValidationError::missing("action"));
    }

    #[test]
    fn rejects_unknown_action() {
        let err = validate(r#"{"todo_id": 1, "action": "todo_archived"}"#).unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownAction {
                action: "todo_archived".to_string()
            }
        );
    }

    #[test]
    fn rejects_non_string_action() {
        let err = validate(r#"{"todo_id": 1, "action": 5}"#).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { field: "action", .. }));
    }

    #[test]
    fn rejects_unknown_payload_fields() {
        let err = validate(
            r#"{"todo_id": 1, "action": "todo_created", "title": "x", "owner": "mallory"}"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownField {
                field: "owner".to_string()
            }
        );
    }

    #[test]
    fn create_requires_a_title() {
        let err = validate(r#"{"todo_id": 1, "action": "todo_created"}"#).unwrap_err();
        assert_eq!(err, ValidationError::missing("title"));

        let err =
            validate(r#"{"todo_id": 1, "action": "todo_created", "title": null}"#).unwrap_err();
        assert_eq!(err, ValidationError::missing("title"));
    }

    #[test]
    fn create_rejects_blank_title() {
        let err =
            validate(r#"{"todo_id": 1, "action": "todo_created", "title": "   "}"#).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { field: "title", .. }));
    }

    #[test]
    fn update_distinguishes_absent_null_and_value_for_description() {
        let envelope = validate(r#"{"todo_id": 1, "action": "todo_updated"}"#).unwrap();
        let Mutation::Update(patch) = envelope.mutation else {
            panic!("expected an update mutation");
        };
        assert_eq!(patch.description, None);

        let envelope =
            validate(r#"{"todo_id": 1, "action": "todo_updated", "description": null}"#).unwrap();
        let Mutation::Update(patch) = envelope.mutation else {
            panic!("expected an update mutation");
        };
        assert_eq!(patch.description, Some(None));

        let envelope =
            validate(r#"{"todo_id": 1, "action": "todo_updated", "description": "notes"}"#)
                .unwrap();
        let Mutation::Update(patch) = envelope.mutation else {
            panic!("expected an update mutation");
        };
        assert_eq!(patch.description, Some(Some("notes".to_string())));
    }

    #[test]
    fn update_rejects_null_title() {
        let err =
            validate(r#"{"todo_id": 1, "action": "todo_updated", "title": null}"#).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { field: "title", .. }));
    }

    #[test]
    fn rejects_null_status_and_priority() {
        let err = validate(r#"{"todo_id": 1, "action": "todo_updated", "status": null}"#)
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { field: "status", .. }));

        let err = validate(r#"{"todo_id": 1, "action": "todo_updated", "priority": null}"#)
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { field: "priority", .. }));

        // Create has defaults for both, but an explicit null is not one.
        let err = validate(
            r#"{"todo_id": 1, "action": "todo_created", "title": "x", "status": null}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { field: "status", .. }));
    }

    #[test]
    fn update_clears_due_date_with_explicit_null() {
        let envelope =
            validate(r#"{"todo_id": 1, "action": "todo_updated", "due_date": null}"#).unwrap();
        let Mutation::Update(patch) = envelope.mutation else {
            panic!("expected an update mutation");
        };
        assert_eq!(patch.due_date, Some(None));
        assert_eq!(patch.title, None);
    }

    #[test]
    fn rejects_status_outside_the_closed_set() {
        let err = validate(r#"{"todo_id": 1, "action": "todo_updated", "status": "done"}"#)
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { field: "status", .. }));
    }

    #[test]
    fn rejects_unparseable_due_date() {
        let err = validate(
            r#"{"todo_id": 1, "action": "todo_updated", "due_date": "next tuesday"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { field: "due_date", .. }));
    }

    #[test]
    fn due_date_accepts_offset_free_timestamps() {
        let envelope = validate(
            r#"{"todo_id": 1, "action": "todo_updated", "due_date": "2026-09-01T12:30:00"}"#,
        )
        .unwrap();
        let Mutation::Update(patch) = envelope.mutation else {
            panic!("expected an update mutation");
        };
        assert_eq!(
            patch.due_date,
            Some(Some(Utc.with_ymd_and_hms(2026, 9, 1, 12, 30, 0).unwrap()))
        );

        // Fractional seconds, as emitted by producers that keep microseconds.
        let envelope = validate(
            r#"{"todo_id": 1, "action": "todo_updated",
                "due_date": "2026-09-01T12:30:00.250000"}"#,
        )
        .unwrap();
        let Mutation::Update(patch) = envelope.mutation else {
            panic!("expected an update mutation");
        };
        let Some(Some(due)) = patch.due_date else {
            panic!("expected a due date");
        };
        assert_eq!(due.timestamp_millis() % 1_000, 250);
    }

    #[test]
    fn delete_ignores_payload_fields() {
        let envelope =
            validate(r#"{"todo_id": 9, "action": "todo_deleted", "title": "stale"}"#).unwrap();
        assert_eq!(envelope.mutation, Mutation::Delete);
    }

    #[test]
    fn parse_maps_failures_into_the_pipeline_taxonomy() {
        let err = Envelope::parse("{{{").unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
        assert!(!err.is_retriable());

        let err = Envelope::parse(r#"{"todo_id": 1, "action": "nope"}"#).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert!(!err.is_retriable());

        let envelope = Envelope::parse(r#"{"todo_id": 2, "action": "todo_deleted"}"#).unwrap();
        assert_eq!(envelope.todo_id, 2);
    }
}
