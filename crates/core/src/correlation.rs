//! Correlation property types and values.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Declared type of a saga's correlation property.
///
/// Determines the column type of the materialised correlation column.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationType {
    String,
    Int,
    Guid,
}

/// A concrete correlation value, typed per [`CorrelationType`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CorrelationValue {
    Guid(Uuid),
    Int(i64),
    String(String),
}

/// Why a JSON value could not be used as a correlation value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected {expected:?} correlation value, found {found}")]
pub struct CorrelationTypeMismatch {
    pub expected: CorrelationType,
    pub found: String,
}

impl CorrelationType {
    /// Interpret a JSON value as a correlation value of this type.
    ///
    /// `null` and a missing value both mean "no correlation value" (`Ok(None)`).
    pub fn coerce(self, value: Option<&JsonValue>) -> Result<Option<CorrelationValue>, CorrelationTypeMismatch> {
        let value = match value {
            None | Some(JsonValue::Null) => return Ok(None),
            Some(v) => v,
        };

        let mismatch = || CorrelationTypeMismatch {
            expected: self,
            found: value.to_string(),
        };

        match self {
            CorrelationType::String => match value {
                JsonValue::String(s) => Ok(Some(CorrelationValue::String(s.clone()))),
                _ => Err(mismatch()),
            },
            CorrelationType::Int => match value {
                JsonValue::Number(n) => n.as_i64().map(|i| Some(CorrelationValue::Int(i))).ok_or_else(mismatch),
                JsonValue::String(s) => s.parse::<i64>().map(|i| Some(CorrelationValue::Int(i))).map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            CorrelationType::Guid => match value {
                JsonValue::String(s) => Uuid::parse_str(s)
                    .map(|u| Some(CorrelationValue::Guid(u)))
                    .map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
        }
    }
}

impl CorrelationValue {
    pub fn correlation_type(&self) -> CorrelationType {
        match self {
            CorrelationValue::Guid(_) => CorrelationType::Guid,
            CorrelationValue::Int(_) => CorrelationType::Int,
            CorrelationValue::String(_) => CorrelationType::String,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            CorrelationValue::Guid(u) => JsonValue::String(u.to_string()),
            CorrelationValue::Int(i) => JsonValue::from(*i),
            CorrelationValue::String(s) => JsonValue::String(s.clone()),
        }
    }
}

impl core::fmt::Display for CorrelationValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CorrelationValue::Guid(u) => write!(f, "{u}"),
            CorrelationValue::Int(i) => write!(f, "{i}"),
            CorrelationValue::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for CorrelationValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for CorrelationValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for CorrelationValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<Uuid> for CorrelationValue {
    fn from(value: Uuid) -> Self {
        Self::Guid(value)
    }
}
