//! `sagastore-core`: saga definition and identity building blocks.
//!
//! This crate contains **pure** primitives (no storage or SQL concerns).

pub mod correlation;
pub mod definition;
pub mod error;
pub mod id;
pub mod token;

pub use correlation::{CorrelationType, CorrelationTypeMismatch, CorrelationValue};
pub use definition::{
    CorrelationProperty, FinderBinding, MessageMapping, SagaDefinition, SagaDefinitionBuilder,
    SagaDefinitionSpec,
};
pub use error::{ConfigError, ConfigResult};
pub use id::{FinderId, MessageId, MessageKind, SagaId};
pub use token::ConcurrencyToken;
