//! In-memory field values.

use chrono::{DateTime, Utc};
use std::fmt;

/// An in-memory field value.
///
/// [`Value::Unset`] is the sentinel for "never assigned". It is a variant
/// of its own, so it is never equal to an empty string, zero or `false`;
/// it only equals another `Unset`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// The field was never assigned.
    #[default]
    Unset,
    /// UTF-8 text.
    Text(String),
    /// Signed integer.
    Integer(i64),
    /// Floating point number (always finite).
    Float(f64),
    /// Boolean.
    Bool(bool),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Structured JSON document.
    Json(serde_json::Value),
    /// Instant in UTC.
    Datetime(DateTime<Utc>),
    /// Primary key of a record in another model.
    Link(u64),
    /// Primary keys of records in another model.
    Links(Vec<u64>),
}

impl Value {
    /// Creates a link to the given primary key.
    pub const fn link(pk: u64) -> Self {
        Value::Link(pk)
    }

    /// Checks if this is the unset sentinel.
    pub fn is_unset(&self) -> bool {
        matches!(self, Value::Unset)
    }

    /// Short name of the variant, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Unset => "unset",
            Value::Text(_) => "text",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Bytes(_) => "bytes",
            Value::Json(_) => "json",
            Value::Datetime(_) => "datetime",
            Value::Link(_) => "link",
            Value::Links(_) => "links",
        }
    }

    /// Get this value as text, if it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a float, if it is one.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as bytes, if it holds bytes.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get the linked primary key, if this is a single link.
    pub fn as_link(&self) -> Option<u64> {
        match self {
            Value::Link(pk) => Some(*pk),
            _ => None,
        }
    }

    /// Get the linked primary keys of a single or multi link.
    pub fn linked_keys(&self) -> Vec<u64> {
        match self {
            Value::Link(pk) => vec![*pk],
            Value::Links(pks) => pks.clone(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unset => f.write_str("<unset>"),
            Value::Text(s) => f.write_str(s),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Json(j) => write!(f, "{j}"),
            Value::Datetime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Value::Link(pk) => write!(f, "#{pk}"),
            Value::Links(pks) => {
                let joined: Vec<String> = pks.iter().map(|pk| format!("#{pk}")).collect();
                write!(f, "[{}]", joined.join(", "))
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Datetime(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Unset, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_only_equals_unset() {
        assert_eq!(Value::Unset, Value::Unset);
        assert_ne!(Value::Unset, Value::Text(String::new()));
        assert_ne!(Value::Unset, Value::Integer(0));
        assert_ne!(Value::Unset, Value::Bool(false));
        assert_ne!(Value::Unset, Value::Bytes(Vec::new()));
    }

    #[test]
    fn from_impls() {
        assert_eq!(Value::from("a"), Value::Text("a".into()));
        assert_eq!(Value::from(7i32), Value::Integer(7));
        assert_eq!(Value::from(None::<i64>), Value::Unset);
        assert_eq!(Value::from(Some(true)), Value::Bool(true));
        assert_eq!(Value::link(3).as_link(), Some(3));
    }

    #[test]
    fn linked_keys() {
        assert_eq!(Value::Link(4).linked_keys(), vec![4]);
        assert_eq!(Value::Links(vec![1, 2]).linked_keys(), vec![1, 2]);
        assert!(Value::Integer(4).linked_keys().is_empty());
    }

    #[test]
    fn display() {
        assert_eq!(Value::Unset.to_string(), "<unset>");
        assert_eq!(Value::Links(vec![1, 2]).to_string(), "[#1, #2]");
    }
}
