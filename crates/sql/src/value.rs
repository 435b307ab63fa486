//! Bound parameter values.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use sagastore_core::{CorrelationType, CorrelationValue};

/// Logical type of a bound value; needed to bind typed NULLs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    Text,
    Int,
    Uuid,
    Json,
}

/// A value bound to a statement parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
    Null(SqlType),
    Text(String),
    Int(i64),
    Uuid(Uuid),
    Json(JsonValue),
}

impl SqlValue {
    pub fn sql_type(&self) -> SqlType {
        match self {
            SqlValue::Null(ty) => *ty,
            SqlValue::Text(_) => SqlType::Text,
            SqlValue::Int(_) => SqlType::Int,
            SqlValue::Uuid(_) => SqlType::Uuid,
            SqlValue::Json(_) => SqlType::Json,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null(_))
    }

    /// Typed NULL for a correlation column.
    pub fn null_correlation(ty: CorrelationType) -> Self {
        SqlValue::Null(correlation_sql_type(ty))
    }

    /// Text rendering used when a backend compares against extracted JSON text.
    pub fn into_text(self) -> SqlValue {
        match self {
            SqlValue::Null(_) => SqlValue::Null(SqlType::Text),
            SqlValue::Text(s) => SqlValue::Text(s),
            SqlValue::Int(i) => SqlValue::Text(i.to_string()),
            SqlValue::Uuid(u) => SqlValue::Text(u.to_string()),
            SqlValue::Json(JsonValue::String(s)) => SqlValue::Text(s),
            SqlValue::Json(v) => SqlValue::Text(v.to_string()),
        }
    }

    /// JSON view of the value, for comparisons against the data document.
    pub fn to_json(&self) -> JsonValue {
        match self {
            SqlValue::Null(_) => JsonValue::Null,
            SqlValue::Text(s) => JsonValue::String(s.clone()),
            SqlValue::Int(i) => JsonValue::from(*i),
            SqlValue::Uuid(u) => JsonValue::String(u.to_string()),
            SqlValue::Json(v) => v.clone(),
        }
    }
}

pub fn correlation_sql_type(ty: CorrelationType) -> SqlType {
    match ty {
        CorrelationType::String => SqlType::Text,
        CorrelationType::Int => SqlType::Int,
        CorrelationType::Guid => SqlType::Uuid,
    }
}

impl From<CorrelationValue> for SqlValue {
    fn from(value: CorrelationValue) -> Self {
        match value {
            CorrelationValue::Guid(u) => SqlValue::Uuid(u),
            CorrelationValue::Int(i) => SqlValue::Int(i),
            CorrelationValue::String(s) => SqlValue::Text(s),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<Uuid> for SqlValue {
    fn from(value: Uuid) -> Self {
        SqlValue::Uuid(value)
    }
}

impl From<JsonValue> for SqlValue {
    fn from(value: JsonValue) -> Self {
        SqlValue::Json(value)
    }
}
