//! Startup-time configuration error model.

use thiserror::Error;

/// Result type used for configuration and definition building.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration error.
///
/// Everything in here is detected while the store is being configured, before
/// any message is processed. Message-time failures live in the session layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A value failed validation (malformed name, identifier, path).
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// The saga has neither a correlation property nor a finder, so it could
    /// never be found again after creation.
    #[error("saga '{saga}' declares neither a correlation property nor a finder")]
    Unreachable { saga: String },

    /// Two finders registered for the same `(saga, message)` pair.
    #[error("saga '{saga}' already has a finder for message '{message}'")]
    DuplicateFinder { saga: String, message: String },

    /// The same message kind was declared twice on one saga.
    #[error("saga '{saga}' declares message '{message}' more than once")]
    DuplicateMessage { saga: String, message: String },

    /// A handled (non-starting) message has no way to locate its saga.
    #[error("saga '{saga}' cannot locate an instance for message '{message}': no correlation mapping and no finder")]
    NoLookupStrategy { saga: String, message: String },

    /// A message maps a property onto the correlation property, but the saga
    /// does not declare one.
    #[error("saga '{saga}' maps message '{message}' to a correlation property it does not declare")]
    MappingWithoutCorrelation { saga: String, message: String },

    /// A finder was declared for a message the saga does not handle.
    #[error("saga '{saga}' declares a finder for message '{message}' which it does not handle")]
    UnknownFinderMessage { saga: String, message: String },

    /// A definition declares a finder identity with no registered implementation.
    #[error("saga '{saga}' expects finder '{finder}' for message '{message}', but none is registered")]
    MissingFinder {
        saga: String,
        message: String,
        finder: String,
    },

    /// A finder implementation was registered for a pair the definition does not declare.
    #[error("finder '{finder}' registered for saga '{saga}' message '{message}' is not declared by the saga definition")]
    UndeclaredFinder {
        saga: String,
        message: String,
        finder: String,
    },

    /// A construct the selected SQL dialect cannot express.
    #[error("dialect {dialect} does not support {construct}")]
    Unsupported { dialect: String, construct: String },

    #[error("saga '{0}' is registered more than once")]
    DuplicateSaga(String),

    #[error("saga '{0}' is not registered")]
    UnknownSaga(String),
}

impl ConfigError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    pub fn unsupported(dialect: impl Into<String>, construct: impl Into<String>) -> Self {
        Self::Unsupported {
            dialect: dialect.into(),
            construct: construct.into(),
        }
    }
}
