//! Property values.

use crate::types::ObjectId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The value of one property of an object.
///
/// Values are totally ordered: `Null < Bool < Int < String < Ref`, and
/// within a variant by the natural order of the payload. Indexes rely on
/// this ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Value {
    /// Absent value of an optional property.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// UTF-8 string.
    String(String),
    /// Reference to another object.
    Ref(ObjectId),
}

impl Value {
    /// Returns true if this is `Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the boolean payload, if any.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer payload, if any.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the string payload, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the referenced object, if any.
    #[must_use]
    pub fn as_ref_id(&self) -> Option<ObjectId> {
        match self {
            Self::Ref(id) => Some(*id),
            _ => None,
        }
    }

    /// Short name of the variant, used in error messages.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::String(_) => "string",
            Self::Ref(_) => "object",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Ref(id) => write!(f, "{id}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Self::Ref(id)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_ordering() {
        let mut values = vec![
            Value::Ref(ObjectId::new(1)),
            Value::String("a".into()),
            Value::Int(-5),
            Value::Bool(true),
            Value::Null,
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Bool(true),
                Value::Int(-5),
                Value::String("a".into()),
                Value::Ref(ObjectId::new(1)),
            ]
        );
    }

    #[test]
    fn payload_ordering() {
        assert!(Value::Int(-1) < Value::Int(3));
        assert!(Value::String("abc".into()) < Value::String("abd".into()));
        assert!(Value::Bool(false) < Value::Bool(true));
    }

    #[test]
    fn accessors_and_conversions() {
        assert_eq!(Value::from(7).as_int(), Some(7));
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert!(Value::from(None::<i64>).is_null());
        assert_eq!(Value::from(Some("y")), Value::String("y".into()));
        assert_eq!(
            Value::from(ObjectId::new(4)).as_ref_id(),
            Some(ObjectId::new(4))
        );
        assert_eq!(Value::Int(1).as_str(), None);
    }

    #[test]
    fn display() {
        assert_eq!(Value::String("hi".into()).to_string(), "\"hi\"");
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(Value::Int(3).to_string(), "3");
    }
}
