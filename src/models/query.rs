//! Value and result models.
//!
//! [`Value`] is the only thing that ever travels to a driver as a bound parameter.
//! Records are JSON objects keyed by property name on the way in and out of a
//! querier, and by column name between the driver and the entity mapping.

use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;

/// An entity-shaped record: property name to value.
pub type Record = serde_json::Map<String, JsonValue>;

/// A parameter value bound to a placeholder.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    /// Stored as i64 for maximum range
    Int(i64),
    Float(f64),
    Text(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(serialize_with = "serialize_bytes")]
    Bytes(Vec<u8>),
    /// Arrays and objects, bound as the driver's JSON type
    Json(JsonValue),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Kind name used in bind error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
        }
    }

    /// Convert back into a JSON value.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(v) => JsonValue::Bool(*v),
            Self::Int(v) => JsonValue::from(*v),
            Self::Float(v) => serde_json::Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::Text(v) => JsonValue::String(v.clone()),
            Self::Bytes(v) => {
                use base64::{Engine as _, engine::general_purpose::STANDARD};
                JsonValue::String(STANDARD.encode(v))
            }
            Self::Json(v) => v.clone(),
        }
    }
}

#[allow(clippy::ptr_arg)]
fn serialize_bytes<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    STANDARD.encode(bytes).serialize(serializer)
}

impl From<JsonValue> for Value {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(v) => Self::Bool(v),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => n.as_f64().map(Self::Float).unwrap_or(Self::Null),
            },
            JsonValue::String(s) => Self::Text(s),
            other => Self::Json(other),
        }
    }
}

impl From<&JsonValue> for Value {
    fn from(value: &JsonValue) -> Self {
        Self::from(value.clone())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Raw outcome of a single statement as reported by the driver adapter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutcome {
    /// Rows keyed by column name (empty for statements that return none).
    pub rows: Vec<Record>,
    pub affected: u64,
    /// MySQL `LAST_INSERT_ID()` / SQLite `last_insert_rowid()`.
    pub last_insert_id: Option<u64>,
}

/// Result of [`Querier::run`](crate::db::Querier::run).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RawResult {
    pub rows: Vec<Record>,
    pub affected: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<u64>,
}

impl From<ExecOutcome> for RawResult {
    fn from(outcome: ExecOutcome) -> Self {
        Self {
            rows: outcome.rows,
            affected: outcome.affected,
            last_insert_id: outcome.last_insert_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_types() {
        assert!(Value::Null.is_null());
        assert!(!Value::Bool(true).is_null());
        assert_eq!(Value::Int(42).type_name(), "int");
        assert_eq!(Value::from("hello").type_name(), "text");
    }

    #[test]
    fn test_value_from_json() {
        assert_eq!(Value::from(json!(null)), Value::Null);
        assert_eq!(Value::from(json!(3)), Value::Int(3));
        assert_eq!(Value::from(json!(1.5)), Value::Float(1.5));
        assert_eq!(Value::from(json!("a")), Value::Text("a".into()));
        assert_eq!(Value::from(json!([1, 2])), Value::Json(json!([1, 2])));
        assert_eq!(Value::from(json!({"k": 1})), Value::Json(json!({"k": 1})));
    }

    #[test]
    fn test_value_option() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".into()));
    }

    #[test]
    fn test_value_serializes_bytes_as_base64() {
        let json = serde_json::to_value(Value::Bytes(b"hello world".to_vec())).unwrap();
        assert_eq!(json, json!("aGVsbG8gd29ybGQ="));
        assert_eq!(Value::Bytes(b"hello world".to_vec()).to_json(), json);
    }

    #[test]
    fn test_raw_result_from_outcome() {
        let outcome = ExecOutcome {
            rows: Vec::new(),
            affected: 3,
            last_insert_id: Some(9),
        };
        let raw = RawResult::from(outcome);
        assert_eq!(raw.affected, 3);
        assert_eq!(raw.last_insert_id, Some(9));
    }
}
