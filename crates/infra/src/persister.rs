//! Persister: validated saga registry with pre-rendered statements.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::info;

use sagastore_core::{ConfigError, ConfigResult, CorrelationValue, FinderId, MessageKind, SagaDefinition};
use sagastore_sql::ast::params;
use sagastore_sql::{SagaScripts, SagaStatements, SqlValue};

use crate::cancel::Cancellation;
use crate::config::PersistenceConfig;
use crate::error::SagaError;
use crate::finder::{FinderRegistry, SagaFinder};
use crate::resolver::CorrelationResolver;
use crate::session::{SagaData, SagaSession};
use crate::store::{BoundStatement, SagaConnection};

/// Everything needed at message time for one saga type.
pub struct SagaRuntime {
    pub(crate) definition: SagaDefinition,
    pub(crate) statements: SagaStatements,
    pub(crate) resolver: CorrelationResolver,
    finders: HashMap<MessageKind, Arc<dyn SagaFinder>>,
}

impl SagaRuntime {
    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn definition(&self) -> &SagaDefinition {
        &self.definition
    }

    pub fn statements(&self) -> &SagaStatements {
        &self.statements
    }

    pub(crate) fn finder(&self, message: &MessageKind) -> Option<&Arc<dyn SagaFinder>> {
        self.finders.get(message)
    }

    /// Correlation value held by a saga data document.
    pub(crate) fn correlation_of(&self, data: &JsonValue) -> Result<Option<CorrelationValue>, SagaError> {
        let Some(property) = self.definition.correlation() else {
            return Ok(None);
        };
        property
            .ty
            .coerce(data.get(&property.name))
            .map_err(|e| SagaError::Serialization(format!("correlation property '{}': {e}", property.name)))
    }

    /// Bind the correlation column (typed NULL when the value is absent).
    pub(crate) fn bind_correlation<'a>(
        &self,
        bound: BoundStatement<'a>,
        value: Option<CorrelationValue>,
    ) -> BoundStatement<'a> {
        match &self.statements.table.correlation {
            Some(column) => {
                let value = value.map(SqlValue::from).unwrap_or_else(|| SqlValue::null_correlation(column.ty));
                bound.bind(params::CORRELATION_ID, value)
            }
            None => bound,
        }
    }
}

impl std::fmt::Debug for SagaRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaRuntime")
            .field("saga", &self.definition.name())
            .field("table", &self.statements.table.name)
            .field("finders", &self.finders.len())
            .finish()
    }
}

/// Entry point of the storage layer.
#[derive(Debug)]
pub struct SagaPersister {
    config: PersistenceConfig,
    sagas: HashMap<String, SagaRuntime>,
}

impl SagaPersister {
    pub fn builder(config: PersistenceConfig) -> SagaPersisterBuilder {
        SagaPersisterBuilder {
            config,
            definitions: Vec::new(),
            finders: FinderRegistry::new(),
            error: None,
        }
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    pub fn runtime(&self, saga: &str) -> ConfigResult<&SagaRuntime> {
        self.sagas
            .get(saga)
            .ok_or_else(|| ConfigError::UnknownSaga(saga.to_string()))
    }

    /// Create/drop scripts for every registered saga, sorted by saga name.
    pub fn scripts(&self) -> ConfigResult<Vec<SagaScripts>> {
        let generator = self.config.generator();
        let mut scripts = self
            .sagas
            .values()
            .map(|runtime| generator.scripts(&runtime.definition))
            .collect::<ConfigResult<Vec<_>>>()?;
        scripts.sort_by(|a, b| a.saga.cmp(&b.saga));
        Ok(scripts)
    }

    /// Open a storage session for `saga` on the caller's transaction.
    pub fn session<'s, D: SagaData>(
        &'s self,
        saga: &str,
        conn: &'s mut dyn SagaConnection,
        cancel: Cancellation,
    ) -> Result<SagaSession<'s, D>, SagaError> {
        let runtime = self.runtime(saga)?;
        if let Some(dialect) = conn.dialect() {
            if dialect != self.config.dialect {
                return Err(ConfigError::unsupported(
                    dialect.to_string(),
                    format!("statements rendered for {}", self.config.dialect),
                )
                .into());
            }
        }
        Ok(SagaSession::new(runtime, conn, cancel))
    }
}

pub struct SagaPersisterBuilder {
    config: PersistenceConfig,
    definitions: Vec<SagaDefinition>,
    finders: FinderRegistry,
    error: Option<ConfigError>,
}

impl SagaPersisterBuilder {
    pub fn saga(mut self, definition: SagaDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    pub fn finder(
        mut self,
        saga: &str,
        message: impl Into<MessageKind>,
        id: impl Into<FinderId>,
        finder: Arc<dyn SagaFinder>,
    ) -> Self {
        if let Err(err) = self.finders.register(saga, message.into(), id.into(), finder) {
            self.error.get_or_insert(err);
        }
        self
    }

    /// Validate the registry and render every statement.
    ///
    /// Fails on the first configuration error; no session can be opened on a
    /// partially valid configuration.
    pub fn build(self) -> ConfigResult<SagaPersister> {
        if let Some(err) = self.error {
            return Err(err);
        }
        self.config.validate()?;
        let generator = self.config.generator();

        let mut sagas = HashMap::with_capacity(self.definitions.len());
        for definition in self.definitions {
            if sagas.contains_key(definition.name()) {
                return Err(ConfigError::DuplicateSaga(definition.name().to_string()));
            }

            let mut finders = HashMap::new();
            for binding in definition.finders() {
                match self.finders.get(definition.name(), &binding.message) {
                    Some((id, finder)) if *id == binding.finder => {
                        finders.insert(binding.message.clone(), Arc::clone(finder));
                    }
                    _ => {
                        return Err(ConfigError::MissingFinder {
                            saga: definition.name().to_string(),
                            message: binding.message.to_string(),
                            finder: binding.finder.to_string(),
                        });
                    }
                }
            }

            let statements = generator.statements(&definition)?;
            let resolver = CorrelationResolver::new(&definition);
            sagas.insert(
                definition.name().to_string(),
                SagaRuntime {
                    definition,
                    statements,
                    resolver,
                    finders,
                },
            );
        }

        for (saga, message, id) in self.finders.entries() {
            let declared = sagas
                .get(saga)
                .and_then(|runtime| runtime.definition.finder_for(message));
            if declared != Some(id) {
                return Err(ConfigError::UndeclaredFinder {
                    saga: saga.to_string(),
                    message: message.to_string(),
                    finder: id.to_string(),
                });
            }
        }

        info!(
            dialect = %self.config.dialect,
            table_prefix = %self.config.table_prefix,
            sagas = sagas.len(),
            finders = self.finders.len(),
            "saga persister configured"
        );

        Ok(SagaPersister {
            config: self.config,
            sagas,
        })
    }
}
