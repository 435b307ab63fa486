//! Custom saga finders.
//!
//! A finder locates a saga instance for a message by arbitrary criteria. It
//! only ever sees rows through [`FinderContext`], so it can return an existing
//! instance or nothing; it cannot make up a new one.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::debug;

use sagastore_core::{ConfigError, ConfigResult, FinderId, MessageKind, SagaId};
use sagastore_messages::MessageEnvelope;
use sagastore_sql::ast::params;
use sagastore_sql::{SagaStatements, SqlValue};

use crate::cancel::Cancellation;
use crate::error::SagaError;
use crate::session::fetch_single;
use crate::store::{BoundStatement, SagaConnection, SagaRow};

/// A saga row located by a finder.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundSaga(SagaRow);

impl FoundSaga {
    pub fn id(&self) -> SagaId {
        self.0.id
    }

    pub fn data(&self) -> &JsonValue {
        &self.0.data
    }

    pub(crate) fn into_row(self) -> SagaRow {
        self.0
    }
}

#[async_trait]
pub trait SagaFinder: Send + Sync {
    async fn find_by(
        &self,
        message: &MessageEnvelope,
        ctx: &mut FinderContext<'_>,
    ) -> Result<Option<FoundSaga>, SagaError>;
}

/// Lookups available to a finder, executed on the session's connection and
/// therefore inside the caller's transaction.
pub struct FinderContext<'a> {
    saga: &'a str,
    statements: &'a SagaStatements,
    conn: &'a mut dyn SagaConnection,
    cancel: &'a Cancellation,
}

impl<'a> FinderContext<'a> {
    pub(crate) fn new(
        saga: &'a str,
        statements: &'a SagaStatements,
        conn: &'a mut dyn SagaConnection,
        cancel: &'a Cancellation,
    ) -> Self {
        Self {
            saga,
            statements,
            conn,
            cancel,
        }
    }

    pub fn saga(&self) -> &str {
        self.saga
    }

    pub async fn get_by_id(&mut self, id: SagaId) -> Result<Option<FoundSaga>, SagaError> {
        let bound = BoundStatement::new(&self.statements.select_by_id).bind(params::ID, *id.as_uuid());
        self.single(&bound).await
    }

    /// Instance whose data has `value` at the dotted `path`.
    pub async fn find_by_data(
        &mut self,
        path: &str,
        value: impl Into<SqlValue> + Send,
    ) -> Result<Option<FoundSaga>, SagaError> {
        let prepared = self.statements.select_by_data(path)?;
        let value = value.into();
        let value = match self.conn.dialect() {
            Some(dialect) => dialect.sql().json_comparison_value(value),
            None => value,
        };
        let bound = BoundStatement::new(&prepared).bind(params::DATA_VALUE, value);
        self.single(&bound).await
    }

    /// Instance matching a caller-written where clause. `@name` tokens in the
    /// clause are bound from `args`.
    pub async fn find_where(
        &mut self,
        where_clause: &str,
        args: Vec<(&str, SqlValue)>,
    ) -> Result<Option<FoundSaga>, SagaError> {
        let prepared = self.statements.select_where(where_clause)?;
        let bound = args
            .into_iter()
            .fold(BoundStatement::new(&prepared), |bound, (name, value)| bound.bind(name, value));
        self.single(&bound).await
    }

    async fn single(&mut self, bound: &BoundStatement<'_>) -> Result<Option<FoundSaga>, SagaError> {
        let row = fetch_single(&mut *self.conn, self.cancel, self.saga, bound).await?;
        Ok(row.map(FoundSaga))
    }
}

/// Finder implementations keyed by `(saga, message)`.
#[derive(Default, Clone)]
pub struct FinderRegistry {
    finders: HashMap<(String, MessageKind), (FinderId, Arc<dyn SagaFinder>)>,
}

impl FinderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        saga: &str,
        message: MessageKind,
        id: FinderId,
        finder: Arc<dyn SagaFinder>,
    ) -> ConfigResult<()> {
        let key = (saga.to_string(), message);
        if self.finders.contains_key(&key) {
            return Err(ConfigError::DuplicateFinder {
                saga: key.0,
                message: key.1.to_string(),
            });
        }
        debug!(saga, message = %key.1, finder = %id, "registered saga finder");
        self.finders.insert(key, (id, finder));
        Ok(())
    }

    pub fn get(&self, saga: &str, message: &MessageKind) -> Option<(&FinderId, &Arc<dyn SagaFinder>)> {
        self.finders
            .get(&(saga.to_string(), message.clone()))
            .map(|(id, finder)| (id, finder))
    }

    pub fn len(&self) -> usize {
        self.finders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.finders.is_empty()
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (&str, &MessageKind, &FinderId)> {
        self.finders
            .iter()
            .map(|((saga, message), (id, _))| (saga.as_str(), message, id))
    }
}

impl std::fmt::Debug for FinderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinderRegistry")
            .field("finders", &self.finders.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopFinder;

    #[async_trait]
    impl SagaFinder for NoopFinder {
        async fn find_by(
            &self,
            _message: &MessageEnvelope,
            _ctx: &mut FinderContext<'_>,
        ) -> Result<Option<FoundSaga>, SagaError> {
            Ok(None)
        }
    }

    #[test]
    fn one_finder_per_saga_and_message() {
        let mut registry = FinderRegistry::new();
        registry
            .register("TestSaga", "Start".into(), "First".into(), Arc::new(NoopFinder))
            .unwrap();
        registry
            .register("OtherSaga", "Start".into(), "First".into(), Arc::new(NoopFinder))
            .unwrap();
        let err = registry
            .register("TestSaga", "Start".into(), "Second".into(), Arc::new(NoopFinder))
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateFinder { .. }));
        assert_eq!(registry.len(), 2);
        let (id, _) = registry.get("TestSaga", &"Start".into()).unwrap();
        assert_eq!(id.as_str(), "First");
    }
}
