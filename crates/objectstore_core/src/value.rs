//! Typed attribute values.
//!
//! # Responsibility
//! - Define the value shapes a record attribute can hold.
//! - Provide ordering and type-acceptance rules shared by predicates,
//!   validation and the row codec.
//!
//! # Invariants
//! - `Date` is always Unix epoch milliseconds.
//! - `Reference` only ever appears under a to-one relationship name.

use crate::record::ObjectId;
use crate::schema::AttributeType;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// One attribute or to-one relationship value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Uuid(Uuid),
    /// Unix epoch milliseconds.
    Date(i64),
    Binary(Vec<u8>),
    Reference(ObjectId),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) | Self::Date(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(value) => Some(*value),
            Self::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<ObjectId> {
        match self {
            Self::Reference(value) => Some(*value),
            _ => None,
        }
    }

    /// Short type label used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::Uuid(_) => "uuid",
            Self::Date(_) => "date",
            Self::Binary(_) => "binary",
            Self::Reference(_) => "reference",
        }
    }

    /// Converts `self` into the canonical shape for `attribute_type`.
    ///
    /// Returns `None` when the value cannot be stored in that attribute.
    /// `Null` is accepted by every type; optionality is checked separately.
    /// Integers widen into `Double` and `Date`.
    pub fn coerce_to(self, attribute_type: AttributeType) -> Option<Value> {
        match (attribute_type, self) {
            (_, Self::Null) => Some(Self::Null),
            (AttributeType::Boolean, value @ Self::Bool(_)) => Some(value),
            (AttributeType::Integer, value @ Self::Integer(_)) => Some(value),
            (AttributeType::Double, value @ Self::Double(_)) => Some(value),
            (AttributeType::Double, Self::Integer(value)) => Some(Self::Double(value as f64)),
            (AttributeType::String, value @ Self::String(_)) => Some(value),
            (AttributeType::Uuid, value @ Self::Uuid(_)) => Some(value),
            (AttributeType::Date, value @ Self::Date(_)) => Some(value),
            (AttributeType::Date, Self::Integer(value)) => Some(Self::Date(value)),
            (AttributeType::Binary, value @ Self::Binary(_)) => Some(value),
            _ => None,
        }
    }

    /// Orders two values of compatible shape.
    ///
    /// Numbers compare across `Integer`/`Double`; everything else compares
    /// only within the same variant. `Null` sorts before every other value.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, Self::Null) => Some(Ordering::Equal),
            (Self::Null, _) => Some(Ordering::Less),
            (_, Self::Null) => Some(Ordering::Greater),
            (Self::Bool(left), Self::Bool(right)) => Some(left.cmp(right)),
            (Self::Integer(left), Self::Integer(right)) => Some(left.cmp(right)),
            (Self::Date(left), Self::Date(right)) => Some(left.cmp(right)),
            (Self::String(left), Self::String(right)) => Some(left.cmp(right)),
            (Self::Uuid(left), Self::Uuid(right)) => Some(left.cmp(right)),
            (Self::Binary(left), Self::Binary(right)) => Some(left.cmp(right)),
            (Self::Reference(left), Self::Reference(right)) => Some(left.cmp(right)),
            (left, right) => match (left.as_f64(), right.as_f64()) {
                (Some(left), Some(right)) => left.partial_cmp(&right),
                _ => None,
            },
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Double(value) => write!(f, "{value}"),
            Self::String(value) => write!(f, "\"{value}\""),
            Self::Uuid(value) => write!(f, "{value}"),
            Self::Date(value) => write!(f, "date({value})"),
            Self::Binary(value) => write!(f, "<{} bytes>", value.len()),
            Self::Reference(value) => write!(f, "{value}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value)
    }
}

impl From<ObjectId> for Value {
    fn from(value: ObjectId) -> Self {
        Self::Reference(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Current wall-clock time as Unix epoch milliseconds.
pub(crate) fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as i64)
}

#[cfg(test)]
mod tests {
    use super::Value;
    use crate::schema::AttributeType;
    use std::cmp::Ordering;

    #[test]
    fn integers_widen_into_double_and_date() {
        assert_eq!(
            Value::Integer(3).coerce_to(AttributeType::Double),
            Some(Value::Double(3.0))
        );
        assert_eq!(
            Value::Integer(1_700_000_000_000).coerce_to(AttributeType::Date),
            Some(Value::Date(1_700_000_000_000))
        );
        assert_eq!(Value::from("x").coerce_to(AttributeType::Integer), None);
    }

    #[test]
    fn null_is_accepted_by_every_type() {
        for attribute_type in [
            AttributeType::Boolean,
            AttributeType::Integer,
            AttributeType::String,
            AttributeType::Binary,
        ] {
            assert_eq!(Value::Null.coerce_to(attribute_type), Some(Value::Null));
        }
    }

    #[test]
    fn compare_mixes_numbers_but_not_strings() {
        assert_eq!(
            Value::Integer(2).compare(&Value::Double(2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(Value::from("a").compare(&Value::Integer(1)), None);
        assert_eq!(Value::Null.compare(&Value::from("a")), Some(Ordering::Less));
    }
}
