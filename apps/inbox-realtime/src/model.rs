//! Message records and the validated change events built from raw feed
//! payloads.

use std::fmt;

use change_feed::{ChangeKind, RawChange};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("change event has no `{0}` record")]
    MissingRecord(&'static str),
    #[error("change record is missing `{0}`")]
    MissingField(&'static str),
    #[error("change record field `{field}` is malformed: {reason}")]
    Malformed { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    /// Thread ids are opaque but never empty.
    pub fn parse(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else if trimmed.len() == raw.len() {
            Some(Self(raw))
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn parse(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Row of the `messages` table. Only `id` and `thread_id` are required;
/// the remaining columns are carried when the provider sends them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub content: Option<String>,
    pub timestamp: Option<String>,
    pub read: Option<bool>,
    pub platform: Option<String>,
    pub from_user: Option<String>,
}

impl Message {
    pub fn from_record(record: &Value) -> Result<Self, EventError> {
        let fields = record.as_object().ok_or_else(|| EventError::Malformed {
            field: "record",
            reason: format!("expected an object, got {}", json_kind(record)),
        })?;

        let id = key_field(fields, "id")?;
        let id = MessageId::parse(id).ok_or(EventError::MissingField("id"))?;
        let thread_id = key_field(fields, "thread_id")?;
        let thread_id = ThreadId::parse(thread_id).ok_or(EventError::MissingField("thread_id"))?;

        Ok(Self {
            id,
            thread_id,
            content: optional_str(fields, "content")?,
            timestamp: optional_str(fields, "timestamp")?,
            read: optional_bool(fields, "read")?,
            platform: optional_str(fields, "platform")?,
            from_user: optional_str(fields, "from_user")?,
        })
    }
}

/// A validated row change. `Delete` carries the prior row.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Insert { entity: Message },
    Update { entity: Message, prior: Option<Message> },
    Delete { entity: Message },
}

impl ChangeEvent {
    pub fn from_raw(raw: &RawChange) -> Result<Self, EventError> {
        match raw.kind {
            ChangeKind::Insert => {
                let record = present(raw.new.as_ref()).ok_or(EventError::MissingRecord("new"))?;
                Ok(ChangeEvent::Insert {
                    entity: Message::from_record(record)?,
                })
            }
            ChangeKind::Update => {
                let record = present(raw.new.as_ref()).ok_or(EventError::MissingRecord("new"))?;
                // Without REPLICA IDENTITY FULL the prior row only has the key.
                let prior = present(raw.old.as_ref()).and_then(|old| Message::from_record(old).ok());
                Ok(ChangeEvent::Update {
                    entity: Message::from_record(record)?,
                    prior,
                })
            }
            ChangeKind::Delete => {
                let record = present(raw.old.as_ref())
                    .or_else(|| present(raw.new.as_ref()))
                    .ok_or(EventError::MissingRecord("old"))?;
                Ok(ChangeEvent::Delete {
                    entity: Message::from_record(record)?,
                })
            }
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Insert { .. } => ChangeKind::Insert,
            ChangeEvent::Update { .. } => ChangeKind::Update,
            ChangeEvent::Delete { .. } => ChangeKind::Delete,
        }
    }

    pub fn entity(&self) -> &Message {
        match self {
            ChangeEvent::Insert { entity }
            | ChangeEvent::Update { entity, .. }
            | ChangeEvent::Delete { entity } => entity,
        }
    }

    pub fn thread_id(&self) -> &ThreadId {
        &self.entity().thread_id
    }

    pub fn message_id(&self) -> &MessageId {
        &self.entity().id
    }
}

fn present(value: Option<&Value>) -> Option<&Value> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::Object(fields)) if fields.is_empty() => None,
        Some(value) => Some(value),
    }
}

/// Keys arrive as strings (uuid/text columns) or numbers (bigint columns).
fn key_field(fields: &Map<String, Value>, name: &'static str) -> Result<String, EventError> {
    match fields.get(name) {
        None | Some(Value::Null) => Err(EventError::MissingField(name)),
        Some(Value::String(value)) => Ok(value.clone()),
        Some(Value::Number(value)) => Ok(value.to_string()),
        Some(other) => Err(EventError::Malformed {
            field: name,
            reason: format!("expected a string or number, got {}", json_kind(other)),
        }),
    }
}

fn optional_str(
    fields: &Map<String, Value>,
    name: &'static str,
) -> Result<Option<String>, EventError> {
    match fields.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(other) => Err(EventError::Malformed {
            field: name,
            reason: format!("expected a string, got {}", json_kind(other)),
        }),
    }
}

fn optional_bool(
    fields: &Map<String, Value>,
    name: &'static str,
) -> Result<Option<bool>, EventError> {
    match fields.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(value)) => Ok(Some(*value)),
        Some(other) => Err(EventError::Malformed {
            field: name,
            reason: format!("expected a bool, got {}", json_kind(other)),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
