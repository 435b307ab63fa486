//! Static saga definitions: correlation property, handled messages, finder bindings.
//!
//! A [`SagaDefinition`] is built once at startup (programmatically through
//! [`SagaDefinitionBuilder`] or deserialised from configuration) and is
//! immutable afterwards. Construction validates every rule that would
//! otherwise surface while processing messages:
//!
//! - a saga needs a correlation property or at least one finder, otherwise it
//!   is unreachable after creation
//! - at most one finder per message kind
//! - every handled, non-starting message needs a lookup strategy
//! - message property mappings require a declared correlation property

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::correlation::CorrelationType;
use crate::error::{ConfigError, ConfigResult};
use crate::id::{FinderId, MessageKind};

/// Default version recorded in the `SagaTypeVersion` column.
pub const DEFAULT_TYPE_VERSION: &str = "1.0.0";

/// The single property used to match messages to saga instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationProperty {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: CorrelationType,
}

/// A message kind handled by the saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMapping {
    pub kind: MessageKind,
    /// Whether this message may create a new saga instance.
    #[serde(default)]
    pub starts_saga: bool,
    /// Dotted path of the message property carrying the correlation value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_path: Option<String>,
}

/// Binding of a message kind to a custom finder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinderBinding {
    pub message: MessageKind,
    pub finder: FinderId,
}

/// Validated, immutable saga definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SagaDefinitionSpec")]
pub struct SagaDefinition {
    name: String,
    type_version: String,
    correlation: Option<CorrelationProperty>,
    messages: Vec<MessageMapping>,
    finders: Vec<FinderBinding>,
}

/// Unvalidated wire form of a [`SagaDefinition`].
#[derive(Debug, Clone, Deserialize)]
pub struct SagaDefinitionSpec {
    pub name: String,
    #[serde(default = "default_type_version")]
    pub type_version: String,
    #[serde(default)]
    pub correlation: Option<CorrelationProperty>,
    #[serde(default)]
    pub messages: Vec<MessageMapping>,
    #[serde(default)]
    pub finders: Vec<FinderBinding>,
}

fn default_type_version() -> String {
    DEFAULT_TYPE_VERSION.to_string()
}

impl TryFrom<SagaDefinitionSpec> for SagaDefinition {
    type Error = ConfigError;

    fn try_from(spec: SagaDefinitionSpec) -> Result<Self, Self::Error> {
        let definition = SagaDefinition {
            name: spec.name,
            type_version: spec.type_version,
            correlation: spec.correlation,
            messages: spec.messages,
            finders: spec.finders,
        };
        definition.validate()?;
        Ok(definition)
    }
}

impl SagaDefinition {
    pub fn builder(name: impl Into<String>) -> SagaDefinitionBuilder {
        SagaDefinitionBuilder {
            spec: SagaDefinitionSpec {
                name: name.into(),
                type_version: default_type_version(),
                correlation: None,
                messages: Vec::new(),
                finders: Vec::new(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_version(&self) -> &str {
        &self.type_version
    }

    pub fn correlation(&self) -> Option<&CorrelationProperty> {
        self.correlation.as_ref()
    }

    pub fn messages(&self) -> &[MessageMapping] {
        &self.messages
    }

    pub fn finders(&self) -> &[FinderBinding] {
        &self.finders
    }

    pub fn message(&self, kind: &MessageKind) -> Option<&MessageMapping> {
        self.messages.iter().find(|m| &m.kind == kind)
    }

    pub fn finder_for(&self, kind: &MessageKind) -> Option<&FinderId> {
        self.finders.iter().find(|f| &f.message == kind).map(|f| &f.finder)
    }

    fn validate(&self) -> ConfigResult<()> {
        validate_identifier("saga name", &self.name)?;
        if self.type_version.trim().is_empty() {
            return Err(ConfigError::invalid(format!("saga '{}' has an empty type version", self.name)));
        }

        if let Some(correlation) = &self.correlation {
            validate_identifier("correlation property", &correlation.name)?;
        }

        if self.correlation.is_none() && self.finders.is_empty() {
            return Err(ConfigError::Unreachable {
                saga: self.name.clone(),
            });
        }

        let mut seen = BTreeSet::new();
        for mapping in &self.messages {
            if !seen.insert(&mapping.kind) {
                return Err(ConfigError::DuplicateMessage {
                    saga: self.name.clone(),
                    message: mapping.kind.to_string(),
                });
            }
            if let Some(path) = &mapping.correlation_path {
                if self.correlation.is_none() {
                    return Err(ConfigError::MappingWithoutCorrelation {
                        saga: self.name.clone(),
                        message: mapping.kind.to_string(),
                    });
                }
                validate_path(path)?;
            }
        }

        let mut finder_messages = BTreeSet::new();
        for binding in &self.finders {
            if !finder_messages.insert(&binding.message) {
                return Err(ConfigError::DuplicateFinder {
                    saga: self.name.clone(),
                    message: binding.message.to_string(),
                });
            }
            if !seen.contains(&binding.message) {
                return Err(ConfigError::UnknownFinderMessage {
                    saga: self.name.clone(),
                    message: binding.message.to_string(),
                });
            }
        }

        for mapping in &self.messages {
            let has_lookup = mapping.correlation_path.is_some() || finder_messages.contains(&mapping.kind);
            if !mapping.starts_saga && !has_lookup {
                return Err(ConfigError::NoLookupStrategy {
                    saga: self.name.clone(),
                    message: mapping.kind.to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Fluent builder for [`SagaDefinition`]; validation happens in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct SagaDefinitionBuilder {
    spec: SagaDefinitionSpec,
}

impl SagaDefinitionBuilder {
    pub fn type_version(mut self, version: impl Into<String>) -> Self {
        self.spec.type_version = version.into();
        self
    }

    pub fn correlation(mut self, name: impl Into<String>, ty: CorrelationType) -> Self {
        self.spec.correlation = Some(CorrelationProperty { name: name.into(), ty });
        self
    }

    /// Declare a saga-starting message, optionally mapped to the correlation property.
    pub fn started_by(mut self, kind: impl Into<MessageKind>, correlation_path: Option<&str>) -> Self {
        self.spec.messages.push(MessageMapping {
            kind: kind.into(),
            starts_saga: true,
            correlation_path: correlation_path.map(str::to_string),
        });
        self
    }

    /// Declare a message handled by existing instances only.
    pub fn handles(mut self, kind: impl Into<MessageKind>, correlation_path: Option<&str>) -> Self {
        self.spec.messages.push(MessageMapping {
            kind: kind.into(),
            starts_saga: false,
            correlation_path: correlation_path.map(str::to_string),
        });
        self
    }

    pub fn finder(mut self, message: impl Into<MessageKind>, finder: impl Into<FinderId>) -> Self {
        self.spec.finders.push(FinderBinding {
            message: message.into(),
            finder: finder.into(),
        });
        self
    }

    pub fn build(self) -> ConfigResult<SagaDefinition> {
        SagaDefinition::try_from(self.spec)
    }
}

/// Identifiers end up inside generated SQL, so only `[A-Za-z_][A-Za-z0-9_]*` is accepted.
pub fn validate_identifier(what: &str, value: &str) -> ConfigResult<()> {
    let mut chars = value.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(ConfigError::invalid(format!("{what} '{value}' is not a valid identifier")))
    }
}

/// Dotted property path, each segment an identifier (e.g. `order.id`).
pub fn validate_path(path: &str) -> ConfigResult<()> {
    if path.is_empty() {
        return Err(ConfigError::invalid("empty property path"));
    }
    for segment in path.split('.') {
        validate_identifier("property path segment", segment)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saga_without_correlation_or_finder_is_unreachable() {
        let err = SagaDefinition::builder("OrderSaga")
            .started_by("StartOrder", None)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Unreachable {
                saga: "OrderSaga".into()
            }
        );
    }

    #[test]
    fn finder_only_saga_is_valid() {
        let def = SagaDefinition::builder("TestSaga")
            .started_by("StartSagaMessage", None)
            .handles("SomeOtherMessage", None)
            .finder("StartSagaMessage", "FindByStartSagaMessage")
            .finder("SomeOtherMessage", "FindBySomeOtherMessage")
            .build()
            .unwrap();
        assert!(def.correlation().is_none());
        assert_eq!(
            def.finder_for(&"SomeOtherMessage".into()),
            Some(&FinderId::new("FindBySomeOtherMessage"))
        );
    }

    #[test]
    fn second_finder_for_same_message_is_rejected() {
        let err = SagaDefinition::builder("TestSaga")
            .started_by("Start", None)
            .finder("Start", "A")
            .finder("Start", "B")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateFinder { .. }));
    }

    #[test]
    fn handled_message_without_lookup_is_rejected() {
        let err = SagaDefinition::builder("OrderSaga")
            .correlation("OrderId", CorrelationType::String)
            .started_by("StartOrder", Some("OrderId"))
            .handles("Orphan", None)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::NoLookupStrategy { ref message, .. } if message == "Orphan"));
    }

    #[test]
    fn mapping_requires_correlation_property() {
        let err = SagaDefinition::builder("OrderSaga")
            .started_by("StartOrder", Some("OrderId"))
            .finder("StartOrder", "F")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MappingWithoutCorrelation { .. }));
    }

    #[test]
    fn finder_for_unhandled_message_is_rejected() {
        let err = SagaDefinition::builder("OrderSaga")
            .correlation("OrderId", CorrelationType::String)
            .started_by("StartOrder", Some("OrderId"))
            .finder("Elsewhere", "F")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownFinderMessage { .. }));
    }

    #[test]
    fn invalid_names_are_rejected() {
        assert!(SagaDefinition::builder("Order Saga")
            .correlation("OrderId", CorrelationType::String)
            .build()
            .is_err());
        assert!(SagaDefinition::builder("OrderSaga")
            .correlation("Order-Id", CorrelationType::String)
            .build()
            .is_err());
        assert!(validate_path("order..id").is_err());
        assert!(validate_path("order.id").is_ok());
    }

    #[test]
    fn deserialisation_validates() {
        let json = r#"{ "name": "OrderSaga", "messages": [{ "kind": "StartOrder", "starts_saga": true }] }"#;
        let err = serde_json::from_str::<SagaDefinition>(json).unwrap_err();
        assert!(err.to_string().contains("neither a correlation property nor a finder"));

        let json = r#"{
            "name": "OrderSaga",
            "correlation": { "name": "OrderId", "type": "guid" },
            "messages": [{ "kind": "StartOrder", "starts_saga": true, "correlation_path": "OrderId" }]
        }"#;
        let def: SagaDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(def.type_version(), DEFAULT_TYPE_VERSION);
        assert_eq!(def.correlation().map(|c| c.ty), Some(CorrelationType::Guid));
    }
}
