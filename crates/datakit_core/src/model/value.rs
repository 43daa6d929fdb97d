//! Field values and key values shared by every entity type.
//!
//! # Responsibility
//! - Mirror SQLite storage classes as one owned value enum.
//! - Restrict key-capable values to integer or non-blank text.
//!
//! # Invariants
//! - `EntityKey` never holds blank text.
//! - Booleans are stored as integers `0`/`1`.

use crate::model::ModelError;
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use serde::ser::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Attribute map of one entity, ordered by field name.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// One stored attribute value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldValue {
    #[default]
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns `true` for null values and whitespace-only text.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(text) => text.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Renders scalar values as text; `None` for null and blob values.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Null | Self::Blob(_) => None,
            Self::Integer(value) => Some(value.to_string()),
            Self::Real(value) => Some(value.to_string()),
            Self::Text(value) => Some(value.clone()),
        }
    }

    /// Converts one decoded JSON value.
    ///
    /// Nested arrays/objects are kept as their JSON text, matching how a
    /// JSON column stores them.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(flag) => Self::from(flag),
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(integer) => Self::Integer(integer),
                None => number.as_f64().map_or(Self::Null, Self::Real),
            },
            serde_json::Value::String(text) => Self::Text(text),
            nested @ (serde_json::Value::Array(_) | serde_json::Value::Object(_)) => {
                Self::Text(nested.to_string())
            }
        }
    }
}

impl Display for FieldValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Real(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value}"),
            Self::Blob(value) => write!(f, "<blob {} bytes>", value.len()),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Integer(value) => serializer.serialize_i64(*value),
            Self::Real(value) => serializer.serialize_f64(*value),
            Self::Text(value) => serializer.serialize_str(value),
            Self::Blob(value) => serializer.serialize_bytes(value),
        }
    }
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Integer(value) => ToSqlOutput::Owned(Value::Integer(*value)),
            Self::Real(value) => ToSqlOutput::Owned(Value::Real(*value)),
            Self::Text(value) => ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes())),
            Self::Blob(value) => ToSqlOutput::Borrowed(ValueRef::Blob(value)),
        })
    }
}

impl From<ValueRef<'_>> for FieldValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(value) => Self::Integer(value),
            ValueRef::Real(value) => Self::Real(value),
            ValueRef::Text(bytes) => Self::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => Self::Blob(bytes.to_vec()),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Blob(value)
    }
}

impl From<Uuid> for FieldValue {
    fn from(value: Uuid) -> Self {
        Self::Text(value.to_string())
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl From<EntityKey> for FieldValue {
    fn from(value: EntityKey) -> Self {
        match value {
            EntityKey::Integer(value) => Self::Integer(value),
            EntityKey::Text(value) => Self::Text(value),
        }
    }
}

impl From<&EntityKey> for FieldValue {
    fn from(value: &EntityKey) -> Self {
        value.clone().into()
    }
}

/// Value usable as a primary key or code key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKey {
    Integer(i64),
    Text(String),
}

impl Display for EntityKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value}"),
        }
    }
}

impl TryFrom<FieldValue> for EntityKey {
    type Error = ModelError;

    fn try_from(value: FieldValue) -> Result<Self, Self::Error> {
        match value {
            FieldValue::Integer(value) => Ok(Self::Integer(value)),
            FieldValue::Text(text) if text.trim().is_empty() => Err(ModelError::InvalidKey(
                "id cannot be a blank string".to_string(),
            )),
            FieldValue::Text(text) => Ok(Self::Text(text)),
            other => Err(ModelError::InvalidKey(format!(
                "id has to be an integer or a string, got `{other}`"
            ))),
        }
    }
}

impl TryFrom<&FieldValue> for EntityKey {
    type Error = ModelError;

    fn try_from(value: &FieldValue) -> Result<Self, Self::Error> {
        Self::try_from(value.clone())
    }
}

impl From<i64> for EntityKey {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for EntityKey {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for EntityKey {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

#[cfg(test)]
mod tests {
    use super::{EntityKey, FieldValue};

    #[test]
    fn key_conversion_rejects_blank_and_non_key_values() {
        assert!(EntityKey::try_from(FieldValue::from("   ")).is_err());
        assert!(EntityKey::try_from(FieldValue::Real(0.1)).is_err());
        assert!(EntityKey::try_from(FieldValue::Null).is_err());
        assert_eq!(
            EntityKey::try_from(FieldValue::from(7_i64)).unwrap(),
            EntityKey::Integer(7)
        );
        assert_eq!(
            EntityKey::try_from(FieldValue::from("abc")).unwrap(),
            EntityKey::Text("abc".to_string())
        );
    }

    #[test]
    fn json_values_map_to_storage_classes() {
        let decoded: serde_json::Value =
            serde_json::from_str(r#"{"a":1,"b":1.5,"c":true,"d":null,"e":[1,2]}"#).unwrap();
        let object = decoded.as_object().unwrap();

        assert_eq!(FieldValue::from_json(object["a"].clone()), FieldValue::Integer(1));
        assert_eq!(FieldValue::from_json(object["b"].clone()), FieldValue::Real(1.5));
        assert_eq!(FieldValue::from_json(object["c"].clone()), FieldValue::Integer(1));
        assert_eq!(FieldValue::from_json(object["d"].clone()), FieldValue::Null);
        assert_eq!(
            FieldValue::from_json(object["e"].clone()),
            FieldValue::Text("[1,2]".to_string())
        );
    }

    #[test]
    fn serializes_as_plain_json_scalars() {
        let json = serde_json::to_string(&vec![
            FieldValue::Null,
            FieldValue::Integer(3),
            FieldValue::from("x"),
        ])
        .unwrap();
        assert_eq!(json, r#"[null,3,"x"]"#);
    }

    #[test]
    fn blank_detection_covers_null_and_whitespace() {
        assert!(FieldValue::Null.is_blank());
        assert!(FieldValue::from(" \t").is_blank());
        assert!(!FieldValue::from(0_i64).is_blank());
    }
}
