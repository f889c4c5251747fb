//! Query filters and sort orders understood by the record store.
//!
//! A [`Filter`] renders to the store's textual syntax through `Display`
//! (`sender = "a" && deletedBySender = false`) and can also be evaluated
//! directly against a [`Record`], which is what in-memory stores do.

use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

use crate::{Record, UserId};

/// A boolean filter expression over record fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Field equals value.
    Eq(String, Value),
    /// Field differs from value.
    Ne(String, Value),
    /// All sub-filters hold.
    And(Vec<Filter>),
    /// At least one sub-filter holds.
    Or(Vec<Filter>),
}

impl Filter {
    /// `field = value`.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    /// `field != value`.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ne(field.into(), value.into())
    }

    /// Conjunction with another filter, flattening nested `And`s.
    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut parts) => {
                parts.push(other);
                Filter::And(parts)
            }
            first => Filter::And(vec![first, other]),
        }
    }

    /// Disjunction with another filter, flattening nested `Or`s.
    pub fn or(self, other: Filter) -> Self {
        match self {
            Filter::Or(mut parts) => {
                parts.push(other);
                Filter::Or(parts)
            }
            first => Filter::Or(vec![first, other]),
        }
    }

    /// Messages of the `viewer`/`counterparty` pair that the viewer has not hidden.
    pub fn conversation(viewer: &UserId, counterparty: &UserId) -> Self {
        let outgoing = Filter::eq("sender", viewer.as_str())
            .and(Filter::eq("receiver", counterparty.as_str()))
            .and(Filter::eq("deletedBySender", false));
        let incoming = Filter::eq("sender", counterparty.as_str())
            .and(Filter::eq("receiver", viewer.as_str()))
            .and(Filter::eq("deletedByReceiver", false));
        outgoing.or(incoming)
    }

    /// Every message addressed to `user` that is still unread.
    pub fn unread_for(user: &UserId) -> Self {
        Filter::eq("receiver", user.as_str()).and(Filter::eq("read", false))
    }

    /// Every user record except `user`.
    pub fn everyone_except(user: &UserId) -> Self {
        Filter::ne("id", user.as_str())
    }

    /// Evaluate the filter against a record.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::Eq(field, value) => loosely_equal(record.get(field), value),
            Filter::Ne(field, value) => !loosely_equal(record.get(field), value),
            Filter::And(parts) => parts.iter().all(|f| f.matches(record)),
            Filter::Or(parts) => parts.iter().any(|f| f.matches(record)),
        }
    }
}

/// Missing and null fields compare equal to the type's zero value, as they
/// do in the store's query engine.
fn loosely_equal(actual: Option<&Value>, expected: &Value) -> bool {
    match (actual.unwrap_or(&Value::Null), expected) {
        (Value::Null, Value::Bool(false)) => true,
        (Value::Null, Value::String(s)) => s.is_empty(),
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (a, b) => a == b,
    }
}

fn write_value(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::String(s) => write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        Value::Null => f.write_str("null"),
        other => write!(f, "{}", other),
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Eq(field, value) => {
                write!(f, "{} = ", field)?;
                write_value(f, value)
            }
            Filter::Ne(field, value) => {
                write!(f, "{} != ", field)?;
                write_value(f, value)
            }
            Filter::And(parts) | Filter::Or(parts) => {
                let joiner = if matches!(self, Filter::And(_)) {
                    " && "
                } else {
                    " || "
                };
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(joiner)?;
                    }
                    if matches!(part, Filter::And(_) | Filter::Or(_)) {
                        write!(f, "({})", part)?;
                    } else {
                        write!(f, "{}", part)?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// One sort column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    /// Field to sort by.
    pub field: String,
    /// Descending instead of ascending.
    pub descending: bool,
}

/// A multi-column sort order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sort {
    keys: Vec<SortKey>,
}

impl Sort {
    /// Ascending by `field`.
    pub fn by(field: impl Into<String>) -> Self {
        Self::default().then(field)
    }

    /// Add an ascending tie-breaker.
    pub fn then(mut self, field: impl Into<String>) -> Self {
        self.keys.push(SortKey {
            field: field.into(),
            descending: false,
        });
        self
    }

    /// Add a descending tie-breaker.
    pub fn then_desc(mut self, field: impl Into<String>) -> Self {
        self.keys.push(SortKey {
            field: field.into(),
            descending: true,
        });
        self
    }

    /// Message order: `created`, then `id`.
    pub fn chronological() -> Self {
        Self::by("created").then("id")
    }

    /// The sort columns.
    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    /// Compare two records under this order.
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        for key in &self.keys {
            let ord = compare_values(a.get(&key.field), b.get(&key.field));
            let ord = if key.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, key) in self.keys.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if key.descending {
                f.write_str("-")?;
            }
            f.write_str(&key.field)?;
        }
        Ok(())
    }
}
