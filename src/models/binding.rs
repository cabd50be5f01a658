//! Positional parameter values.
//!
//! A [`Binding`] is what the builders collect for every `?` they emit. The
//! executor hands them to the driver in the same order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A parameter value for parameterized statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Binding {
    Null,
    Bool(bool),
    /// Stored as i64 for maximum range
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(uuid::Uuid),
    Timestamp(DateTime<Utc>),
    /// Arrays and objects; bound as `jsonb`
    Json(JsonValue),
    Bytes(Vec<u8>),
}

impl Binding {
    /// Check if this binding is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this binding for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Uuid(_) => "uuid",
            Self::Timestamp(_) => "timestamp",
            Self::Json(_) => "json",
            Self::Bytes(_) => "bytes",
        }
    }
}

impl From<JsonValue> for Binding {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Self::Text(s),
            other => Self::Json(other),
        }
    }
}

impl From<&JsonValue> for Binding {
    fn from(value: &JsonValue) -> Self {
        Self::from(value.clone())
    }
}

macro_rules! binding_from_int {
    ($($t:ty),+) => {
        $(
            impl From<$t> for Binding {
                fn from(v: $t) -> Self {
                    Self::Int(v as i64)
                }
            }
        )+
    };
}

binding_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for Binding {
    fn from(v: f32) -> Self {
        Self::Float(v as f64)
    }
}

impl From<f64> for Binding {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Binding {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Binding {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Binding {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&String> for Binding {
    fn from(v: &String) -> Self {
        Self::Text(v.clone())
    }
}

impl From<uuid::Uuid> for Binding {
    fn from(v: uuid::Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl From<DateTime<Utc>> for Binding {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<Vec<u8>> for Binding {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<Binding>> From<Option<T>> for Binding {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_binding_types() {
        assert!(Binding::Null.is_null());
        assert!(!Binding::Bool(true).is_null());
        assert_eq!(Binding::from(42).type_name(), "int");
        assert_eq!(Binding::from("hello").type_name(), "text");
    }

    #[test]
    fn test_binding_from_json_scalars() {
        assert_eq!(Binding::from(json!(null)), Binding::Null);
        assert_eq!(Binding::from(json!(18)), Binding::Int(18));
        assert_eq!(Binding::from(json!(1.5)), Binding::Float(1.5));
        assert_eq!(Binding::from(json!("John")), Binding::Text("John".into()));
        assert_eq!(Binding::from(json!(false)), Binding::Bool(false));
    }

    #[test]
    fn test_binding_from_json_composite_is_json() {
        let value = json!({"tags": ["a", "b"]});
        assert_eq!(Binding::from(value.clone()), Binding::Json(value));
    }

    #[test]
    fn test_binding_from_option() {
        assert_eq!(Binding::from(None::<i32>), Binding::Null);
        assert_eq!(Binding::from(Some("x")), Binding::Text("x".into()));
    }
}
