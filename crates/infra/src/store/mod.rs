//! Saga row storage boundary.
//!
//! A [`SagaConnection`] is a handle onto the caller's ambient transaction: the
//! storage session executes prepared statements through it but never begins,
//! commits, or rolls back anything itself.
//!
//! Adapters classify backend failures into [`StoreError`] (chiefly: was it a
//! unique-index violation?); the session turns those into the saga error
//! taxonomy. Raw backend codes never leave the adapter.

pub mod in_memory;
pub mod postgres;
pub mod sqlite;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;

use sagastore_core::{ConcurrencyToken, SagaId};
use sagastore_sql::{Dialect, PreparedStatement, SqlValue};

pub use in_memory::{InMemorySagaStore, InMemoryTransaction};
pub use postgres::PgSagaConnection;
pub use sqlite::SqliteSagaConnection;

/// One saga row as returned by a lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct SagaRow {
    pub id: SagaId,
    pub token: ConcurrencyToken,
    pub type_version: String,
    pub metadata: JsonValue,
    pub data: JsonValue,
}

/// Adapter-level failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique index (primary key or correlation column) rejected the write.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("no value bound for parameter '{0}'")]
    MissingParameter(String),

    #[error("operation not supported by this backend: {0}")]
    Unsupported(String),

    #[error("malformed saga row: {0}")]
    MalformedRow(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Anything else the backend reported. `transient` marks connectivity-type
    /// failures that may succeed on redelivery.
    #[error("backend failure in {operation}: {message}")]
    Backend {
        operation: String,
        message: String,
        transient: bool,
    },
}

impl StoreError {
    pub fn backend(operation: &str, message: impl Into<String>, transient: bool) -> Self {
        Self::Backend {
            operation: operation.to_string(),
            message: message.into(),
            transient,
        }
    }
}

/// Named argument values for one execution.
pub type Args = BTreeMap<String, SqlValue>;

/// A prepared statement plus the values to bind to it.
#[derive(Debug, Clone)]
pub struct BoundStatement<'a> {
    pub prepared: &'a PreparedStatement,
    pub args: Args,
}

impl<'a> BoundStatement<'a> {
    pub fn new(prepared: &'a PreparedStatement) -> Self {
        Self {
            prepared,
            args: Args::new(),
        }
    }

    pub fn bind(mut self, name: &str, value: impl Into<SqlValue>) -> Self {
        self.args.insert(name.to_string(), value.into());
        self
    }

    pub fn arg(&self, name: &str) -> Result<&SqlValue, StoreError> {
        self.args
            .get(name)
            .ok_or_else(|| StoreError::MissingParameter(name.to_string()))
    }

    /// Values in the order of the statement's binding plan.
    pub fn ordered_values(&self) -> Result<Vec<SqlValue>, StoreError> {
        self.prepared
            .bindings()
            .iter()
            .map(|name| self.arg(name).cloned())
            .collect()
    }
}

/// Transaction-scoped handle the storage session works through.
#[async_trait]
pub trait SagaConnection: Send {
    /// Dialect whose rendered SQL this connection executes; `None` for
    /// backends that interpret the operation tree directly.
    fn dialect(&self) -> Option<Dialect>;

    /// Run a select and return every matching row.
    async fn fetch(&mut self, statement: &BoundStatement<'_>) -> Result<Vec<SagaRow>, StoreError>;

    /// Run an insert/update/delete and return the number of affected rows.
    async fn execute(&mut self, statement: &BoundStatement<'_>) -> Result<u64, StoreError>;
}

pub(crate) fn parse_json(column: &str, raw: &str) -> Result<JsonValue, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::MalformedRow(format!("column {column}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sagastore_core::{CorrelationType, SagaDefinition};
    use sagastore_sql::ScriptGenerator;

    #[test]
    fn ordered_values_follow_binding_plan() {
        let def = SagaDefinition::builder("OrderSaga")
            .correlation("OrderId", CorrelationType::String)
            .started_by("StartOrder", Some("OrderId"))
            .build()
            .unwrap();
        let statements = ScriptGenerator::new(Dialect::Sqlite, "").statements(&def).unwrap();
        let bound = BoundStatement::new(&statements.delete)
            .bind("Concurrency", 3i64)
            .bind("Id", "abc");
        assert_eq!(
            bound.ordered_values().unwrap(),
            vec![SqlValue::Text("abc".into()), SqlValue::Int(3)]
        );

        let missing = BoundStatement::new(&statements.delete).bind("Id", "abc");
        assert!(matches!(missing.ordered_values(), Err(StoreError::MissingParameter(p)) if p == "Concurrency"));
    }
}
