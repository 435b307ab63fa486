//! Correlation resolution: which lookup to run for an incoming message.

use std::collections::HashMap;

use sagastore_core::{CorrelationProperty, CorrelationValue, FinderId, MessageKind, SagaDefinition};
use sagastore_messages::MessageEnvelope;

use crate::error::SagaError;

/// Lookup selected for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupStrategy {
    /// Select by the materialised correlation column.
    ByCorrelation(CorrelationValue),
    /// Delegate to the registered finder.
    ByFinder(FinderId),
    /// Nothing to look up; the message starts a fresh saga.
    Create,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub strategy: LookupStrategy,
    /// Whether a miss may create a new saga instance.
    pub starts_saga: bool,
    /// Correlation value carried by the message, used to pre-populate new data.
    pub correlation: Option<CorrelationValue>,
}

#[derive(Debug, Clone)]
struct MessagePlan {
    starts_saga: bool,
    correlation_path: Option<String>,
    finder: Option<FinderId>,
}

/// Per-saga resolver built once from the validated definition.
#[derive(Debug, Clone)]
pub struct CorrelationResolver {
    saga: String,
    correlation: Option<CorrelationProperty>,
    plans: HashMap<MessageKind, MessagePlan>,
}

impl CorrelationResolver {
    pub fn new(definition: &SagaDefinition) -> Self {
        let plans = definition
            .messages()
            .iter()
            .map(|mapping| {
                let plan = MessagePlan {
                    starts_saga: mapping.starts_saga,
                    correlation_path: mapping.correlation_path.clone(),
                    finder: definition.finder_for(&mapping.kind).cloned(),
                };
                (mapping.kind.clone(), plan)
            })
            .collect();
        Self {
            saga: definition.name().to_string(),
            correlation: definition.correlation().cloned(),
            plans,
        }
    }

    pub fn handles(&self, kind: &MessageKind) -> bool {
        self.plans.contains_key(kind)
    }

    /// Pick the lookup for `message`.
    ///
    /// A property mapping wins over a finder. When the mapped property is
    /// absent the finder is used if there is one; otherwise a starting message
    /// creates a saga and any other message is rejected.
    pub fn resolve(&self, message: &MessageEnvelope) -> Result<Resolution, SagaError> {
        let kind = message.kind();
        let plan = self.plans.get(kind).ok_or_else(|| SagaError::UnhandledMessage {
            saga: self.saga.clone(),
            message: kind.to_string(),
        })?;

        let correlation = match (&plan.correlation_path, &self.correlation) {
            (Some(path), Some(property)) => property
                .ty
                .coerce(message.property(path))
                .map_err(|e| self.invalid(kind, format!("property '{path}': {e}")))?,
            _ => None,
        };

        let strategy = match (&correlation, &plan.finder) {
            (Some(value), _) => LookupStrategy::ByCorrelation(value.clone()),
            (None, Some(finder)) => LookupStrategy::ByFinder(finder.clone()),
            (None, None) if plan.starts_saga => LookupStrategy::Create,
            (None, None) => {
                let path = plan.correlation_path.as_deref().unwrap_or_default();
                return Err(self.invalid(kind, format!("no correlation value at '{path}'")));
            }
        };

        Ok(Resolution {
            strategy,
            starts_saga: plan.starts_saga,
            correlation,
        })
    }

    fn invalid(&self, kind: &MessageKind, reason: String) -> SagaError {
        SagaError::InvalidCorrelationValue {
            saga: self.saga.clone(),
            message: kind.to_string(),
            reason,
        }
    }
}
