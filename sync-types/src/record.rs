//! Loosely typed records and push events exchanged with the record store.
//!
//! Everything that crosses the store boundary is a [`Record`]: a JSON object
//! with an `id` and arbitrary fields. Typed values ([`crate::Message`],
//! [`crate::UserProfile`]) are produced from records on ingress.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::{Message, TypesError, UserProfile};

/// Field map used for create/update payloads.
pub type Fields = Map<String, Value>;

/// The record collections this engine watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    /// User profiles (the roster).
    Users,
    /// Direct messages.
    Messages,
}

impl Collection {
    /// Collection name as the record store knows it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Messages => "messages",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record as returned by the store.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Fields);

impl Record {
    /// Wrap a field map.
    pub fn new(fields: Fields) -> Self {
        Self(fields)
    }

    /// Build a record from a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self, TypesError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(TypesError::InvalidField {
                field: "record",
                reason: format!("expected object, got {}", other),
            }),
        }
    }

    /// The record id, if present and a non-empty string.
    pub fn id(&self) -> Option<&str> {
        self.get_str("id").filter(|id| !id.is_empty())
    }

    /// Raw field access.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// String field access.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// Boolean field access; missing or null reads as `false`.
    pub fn get_bool(&self, field: &str) -> bool {
        self.0.get(field).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Set a field, returning the previous value.
    pub fn set(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    /// Overwrite fields from a partial update payload.
    pub fn merge(&mut self, fields: &Fields) {
        for (key, value) in fields {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Borrow the underlying field map.
    pub fn fields(&self) -> &Fields {
        &self.0
    }

    /// Consume into the underlying field map.
    pub fn into_fields(self) -> Fields {
        self.0
    }

    /// Convert into a JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Fields> for Record {
    fn from(fields: Fields) -> Self {
        Self(fields)
    }
}

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushAction {
    /// Record was created.
    Create,
    /// Record was updated.
    Update,
    /// Record was deleted from storage.
    Delete,
}

impl fmt::Display for PushAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PushAction::Create => "create",
            PushAction::Update => "update",
            PushAction::Delete => "delete",
        })
    }
}

/// A push notification delivered on a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    /// Collection the record belongs to.
    pub collection: Collection,
    /// What happened.
    pub action: PushAction,
    /// The record after the change (or as it was, for deletes).
    pub record: Record,
}

impl PushEvent {
    /// Create a new push event.
    pub fn new(collection: Collection, action: PushAction, record: Record) -> Self {
        Self {
            collection,
            action,
            record,
        }
    }

    /// Interpret the record as a message.
    pub fn message(&self) -> Result<Message, TypesError> {
        Message::from_record(&self.record)
    }

    /// Interpret the record as a user profile.
    pub fn user(&self) -> Result<UserProfile, TypesError> {
        UserProfile::from_record(&self.record)
    }
}
