//! Direct messages and the writes that mutate them.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{Fields, MessageId, Record, Timestamp, TypesError, UserId};

/// A direct message between two users.
///
/// Field names on the wire follow the record store's camelCase columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Stable identifier.
    pub id: MessageId,
    /// Author. Immutable after creation.
    pub sender: UserId,
    /// Addressee. Immutable after creation.
    pub receiver: UserId,
    /// Text body; replaced by the placeholder once tombstoned.
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    /// Creation time; the ordering key.
    #[serde(default)]
    pub created: Timestamp,
    /// Set by the receiver's client once the message has been shown.
    #[serde(default, deserialize_with = "null_as_default")]
    pub read: bool,
    /// Set on any content edit, never cleared.
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_edited: bool,
    /// Global tombstone. Terminal.
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_deleted: bool,
    /// Hidden from the sender's own view.
    #[serde(default, deserialize_with = "null_as_default")]
    pub deleted_by_sender: bool,
    /// Hidden from the receiver's own view.
    #[serde(default, deserialize_with = "null_as_default")]
    pub deleted_by_receiver: bool,
}

/// Which end of a message a user is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The user wrote the message.
    Sender,
    /// The user received the message.
    Receiver,
}

impl Side {
    /// Name of the per-side hide flag column.
    pub fn hide_field(&self) -> &'static str {
        match self {
            Side::Sender => "deletedBySender",
            Side::Receiver => "deletedByReceiver",
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn require_str(record: &Record, field: &'static str) -> Result<(), TypesError> {
    match record.get(field) {
        None | Some(Value::Null) => Err(TypesError::MissingField(field)),
        Some(Value::String(s)) if s.is_empty() => Err(TypesError::MissingField(field)),
        Some(Value::String(_)) => Ok(()),
        Some(other) => Err(TypesError::InvalidField {
            field,
            reason: format!("expected string, got {}", other),
        }),
    }
}

impl Message {
    /// Map a store record onto a message.
    ///
    /// `id`, `sender` and `receiver` are required; every other field falls
    /// back to its default when missing or null. Unknown fields are ignored.
    pub fn from_record(record: &Record) -> Result<Self, TypesError> {
        require_str(record, "id")?;
        require_str(record, "sender")?;
        require_str(record, "receiver")?;
        Ok(serde_json::from_value(Value::Object(record.fields().clone()))?)
    }

    /// The side `user` is on, or `None` if the message is not theirs.
    pub fn side_of(&self, user: &UserId) -> Option<Side> {
        if &self.sender == user {
            Some(Side::Sender)
        } else if &self.receiver == user {
            Some(Side::Receiver)
        } else {
            None
        }
    }

    /// True when `{sender, receiver} == {a, b}` in either direction.
    pub fn is_between(&self, a: &UserId, b: &UserId) -> bool {
        (&self.sender == a && &self.receiver == b) || (&self.sender == b && &self.receiver == a)
    }

    /// True when `user` has hidden this message from their own view.
    pub fn is_hidden_for(&self, user: &UserId) -> bool {
        (&self.sender == user && self.deleted_by_sender)
            || (&self.receiver == user && self.deleted_by_receiver)
    }

    /// True when `user` received this message and has not read it.
    pub fn is_unread_for(&self, user: &UserId) -> bool {
        &self.receiver == user && &self.sender != user && !self.read
    }

    /// The other participant from `user`'s point of view.
    pub fn counterparty_of(&self, user: &UserId) -> Option<&UserId> {
        match self.side_of(user)? {
            Side::Sender => Some(&self.receiver),
            Side::Receiver => Some(&self.sender),
        }
    }

    /// Total ordering key: creation time, then id.
    pub fn order_key(&self) -> (Timestamp, &MessageId) {
        (self.created, &self.id)
    }
}

/// Payload for creating a message. The store assigns `id` and `created`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    /// Author.
    pub sender: UserId,
    /// Addressee.
    pub receiver: UserId,
    /// Text body.
    pub content: String,
    /// Always false on creation.
    pub read: bool,
    /// Always false on creation.
    pub is_edited: bool,
    /// Always false on creation.
    pub is_deleted: bool,
    /// Always false on creation.
    pub deleted_by_sender: bool,
    /// Always false on creation.
    pub deleted_by_receiver: bool,
}

impl NewMessage {
    /// A fresh message in its initial state.
    pub fn new(sender: UserId, receiver: UserId, content: impl Into<String>) -> Self {
        Self {
            sender,
            receiver,
            content: content.into(),
            read: false,
            is_edited: false,
            is_deleted: false,
            deleted_by_sender: false,
            deleted_by_receiver: false,
        }
    }

    /// Field map for `RecordStore::create`.
    pub fn to_fields(&self) -> Result<Fields, TypesError> {
        to_fields(self)
    }
}

/// A partial update to a message. Unset fields are omitted from the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePatch {
    /// New text body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Read flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read: Option<bool>,
    /// Edited flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_edited: Option<bool>,
    /// Global tombstone flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_deleted: Option<bool>,
    /// Sender-side hide flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_by_sender: Option<bool>,
    /// Receiver-side hide flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_by_receiver: Option<bool>,
}

impl MessagePatch {
    /// Mark as read by the receiver.
    pub fn mark_read() -> Self {
        Self {
            read: Some(true),
            ..Self::default()
        }
    }

    /// Replace the content and flag the message as edited.
    pub fn edit(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            is_edited: Some(true),
            ..Self::default()
        }
    }

    /// Global tombstone: flag as deleted and overwrite the content.
    pub fn tombstone(placeholder: impl Into<String>) -> Self {
        Self {
            content: Some(placeholder.into()),
            is_deleted: Some(true),
            ..Self::default()
        }
    }

    /// Set the hide flag for one side only.
    pub fn hide_for(side: Side) -> Self {
        match side {
            Side::Sender => Self {
                deleted_by_sender: Some(true),
                ..Self::default()
            },
            Side::Receiver => Self {
                deleted_by_receiver: Some(true),
                ..Self::default()
            },
        }
    }

    /// Field map for `RecordStore::update`.
    pub fn to_fields(&self) -> Result<Fields, TypesError> {
        to_fields(self)
    }

    /// Apply the patch to a typed message in place.
    pub fn apply(&self, msg: &mut Message) {
        if let Some(content) = &self.content {
            msg.content = content.clone();
        }
        if let Some(read) = self.read {
            msg.read = read;
        }
        if let Some(flag) = self.is_edited {
            msg.is_edited = flag;
        }
        if let Some(flag) = self.is_deleted {
            msg.is_deleted = flag;
        }
        if let Some(flag) = self.deleted_by_sender {
            msg.deleted_by_sender = flag;
        }
        if let Some(flag) = self.deleted_by_receiver {
            msg.deleted_by_receiver = flag;
        }
    }
}

fn to_fields<T: Serialize>(value: &T) -> Result<Fields, TypesError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(TypesError::InvalidField {
            field: "payload",
            reason: format!("expected object, got {}", other),
        }),
    }
}
