//! Message-time error model of the storage session.

use thiserror::Error;

use sagastore_core::{ConfigError, SagaId};

use crate::store::StoreError;

/// How the message pipeline should react to a failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    /// Fix the configuration; retrying will not help.
    Configuration,
    /// Roll back and redeliver the message.
    Retryable,
    /// Data or programming fault; move the message aside.
    Fatal,
}

#[derive(Debug, Error)]
pub enum SagaError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Another unit of work committed the same saga instance first.
    #[error("saga '{saga}' instance {id} was modified concurrently")]
    Conflict { saga: String, id: SagaId },

    /// Another unit of work created a saga for the same correlation value first.
    #[error("saga '{saga}' already exists for correlation value {correlation}")]
    DuplicateStart { saga: String, correlation: String },

    /// A lookup matched more than one row, or a stored row is unreadable.
    #[error("integrity fault in saga '{saga}': {reason}")]
    Integrity { saga: String, reason: String },

    /// The correlation value of a message or saga data is missing or mistyped.
    #[error("saga '{saga}' message '{message}': {reason}")]
    InvalidCorrelationValue {
        saga: String,
        message: String,
        reason: String,
    },

    #[error("saga '{saga}' instance {id} changed its correlation value from {from} to {to}")]
    CorrelationChanged {
        saga: String,
        id: SagaId,
        from: String,
        to: String,
    },

    #[error("saga '{saga}' does not handle message '{message}'")]
    UnhandledMessage { saga: String, message: String },

    #[error("saga data serialization failed: {0}")]
    Serialization(String),

    /// The session was driven out of order (e.g. loaded twice).
    #[error("invalid session state: {0}")]
    InvalidState(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("processing deadline exceeded")]
    DeadlineExceeded,

    #[error("storage failure: {message}")]
    Store { message: String, transient: bool },
}

impl SagaError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SagaError::Config(_) => ErrorClass::Configuration,
            SagaError::Conflict { .. }
            | SagaError::DuplicateStart { .. }
            | SagaError::Cancelled
            | SagaError::DeadlineExceeded => ErrorClass::Retryable,
            SagaError::Store { transient, .. } => {
                if *transient {
                    ErrorClass::Retryable
                } else {
                    ErrorClass::Fatal
                }
            }
            SagaError::Integrity { .. }
            | SagaError::InvalidCorrelationValue { .. }
            | SagaError::CorrelationChanged { .. }
            | SagaError::UnhandledMessage { .. }
            | SagaError::Serialization(_)
            | SagaError::InvalidState(_) => ErrorClass::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    /// Translate an adapter failure outside the insert path.
    pub(crate) fn from_store(saga: &str, err: StoreError) -> Self {
        match err {
            StoreError::Cancelled => SagaError::Cancelled,
            StoreError::DeadlineExceeded => SagaError::DeadlineExceeded,
            StoreError::UniqueViolation(reason) | StoreError::MalformedRow(reason) => SagaError::Integrity {
                saga: saga.to_string(),
                reason,
            },
            StoreError::Backend { transient, .. } => SagaError::Store {
                message: err.to_string(),
                transient,
            },
            StoreError::MissingParameter(_) | StoreError::Unsupported(_) => SagaError::Store {
                message: err.to_string(),
                transient: false,
            },
        }
    }
}

impl From<serde_json::Error> for SagaError {
    fn from(err: serde_json::Error) -> Self {
        SagaError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes() {
        let conflict = SagaError::Conflict {
            saga: "OrderSaga".into(),
            id: SagaId::new(),
        };
        assert_eq!(conflict.class(), ErrorClass::Retryable);
        assert_eq!(
            SagaError::from(ConfigError::UnknownSaga("X".into())).class(),
            ErrorClass::Configuration
        );
        assert_eq!(
            SagaError::from_store("OrderSaga", StoreError::backend("fetch", "connection reset", true)).class(),
            ErrorClass::Retryable
        );
        assert_eq!(
            SagaError::from_store("OrderSaga", StoreError::MalformedRow("bad json".into())).class(),
            ErrorClass::Fatal
        );
        assert!(SagaError::from_store("OrderSaga", StoreError::Cancelled).is_retryable());
    }
}
