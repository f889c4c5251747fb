//! User profiles as shown in the roster.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use crate::{Record, TypesError, UserId};

/// A user record, reduced to what the roster needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Stable identifier.
    pub id: UserId,
    /// Display name; may be empty.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    /// Login handle; may be empty.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub username: String,
    /// Contact address, when the viewer may see it.
    #[serde(default)]
    pub email: Option<String>,
    /// Avatar file reference.
    #[serde(default)]
    pub avatar: Option<String>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl UserProfile {
    /// Minimal profile with just an id and a name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            name: name.into(),
            username: String::new(),
            email: None,
            avatar: None,
        }
    }

    /// Map a store record onto a profile. Only `id` is required.
    pub fn from_record(record: &Record) -> Result<Self, TypesError> {
        if record.id().is_none() {
            return Err(TypesError::MissingField("id"));
        }
        Ok(serde_json::from_value(Value::Object(record.fields().clone()))?)
    }

    /// Name to show: the display name, falling back to the username.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.username
        } else {
            &self.name
        }
    }

    /// Roster ordering: case-insensitive display name, then id.
    pub fn roster_cmp(&self, other: &Self) -> Ordering {
        self.display_name()
            .to_lowercase()
            .cmp(&other.display_name().to_lowercase())
            .then_with(|| self.id.cmp(&other.id))
    }
}
