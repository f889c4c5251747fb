//! Identity and ordering types for convo-sync.

use chrono::{NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

use crate::TypesError;

/// Identifier of a user record.
///
/// Opaque to this crate; assigned by the record store.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Create a UserId from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the identifier is the empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

/// Identifier of a message record. Immutable for the life of the message.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Create a MessageId from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the identifier is the empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}

/// Creation time of a record, in milliseconds since the Unix epoch (UTC).
///
/// The sole ordering key for messages. Ties are broken by [`MessageId`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(i64);

/// Layout the record store uses for its `created`/`updated` columns.
const STORE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

impl Timestamp {
    /// Create a Timestamp from milliseconds since the epoch.
    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    /// Milliseconds since the epoch.
    pub fn as_millis(&self) -> i64 {
        self.0
    }

    /// Parse either RFC 3339 or the store layout `YYYY-MM-DD HH:MM:SS.sssZ`.
    pub fn parse(text: &str) -> Result<Self, TypesError> {
        let text = text.trim();
        if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(text) {
            return Ok(Self(dt.timestamp_millis()));
        }
        let naive = text.strip_suffix('Z').unwrap_or(text);
        NaiveDateTime::parse_from_str(naive, STORE_FORMAT)
            .map(|dt| Self(Utc.from_utc_datetime(&dt).timestamp_millis()))
            .map_err(|_| TypesError::InvalidTimestamp(text.to_string()))
    }

    /// Interpret a JSON value: integer millis, a timestamp string, or null.
    pub fn from_json(value: &Value) -> Result<Self, TypesError> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .map(Self)
                .ok_or_else(|| TypesError::InvalidTimestamp(n.to_string())),
            Value::String(s) if s.is_empty() => Ok(Self::default()),
            Value::String(s) => Self::parse(s),
            other => Err(TypesError::InvalidTimestamp(other.to_string())),
        }
    }

    /// RFC 3339 rendering with millisecond precision.
    ///
    /// Lexicographic order of the rendering matches numeric order for
    /// post-1970 timestamps, which the record store relies on for sorting.
    pub fn to_rfc3339(&self) -> String {
        match Utc.timestamp_millis_opt(self.0).single() {
            Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
            None => self.0.to_string(),
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(&value).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}
