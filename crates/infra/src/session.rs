//! Saga storage session: load, track, and persist one saga instance within
//! the caller's unit of work.
//!
//! ```text
//! Idle ──load──▶ Found ───────────▶ update / delete / nothing
//!          ├───▶ Started ─────────▶ insert / discard
//!          └───▶ NotFound ────────▶ nothing
//! ```
//!
//! The session never begins or ends a transaction. Writes are issued at
//! [`SagaSession::complete`], and become durable only when the caller commits.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{Span, debug, instrument, warn};

use sagastore_core::{ConcurrencyToken, ConfigError, CorrelationValue, FinderId, MessageId, SagaId};
use sagastore_messages::MessageEnvelope;
use sagastore_sql::ast::params;

use crate::cancel::Cancellation;
use crate::error::SagaError;
use crate::finder::{FinderContext, FoundSaga};
use crate::persister::SagaRuntime;
use crate::resolver::LookupStrategy;
use crate::store::{BoundStatement, SagaConnection, SagaRow, StoreError};

/// Value of the `PersistenceVersion` column.
pub const PERSISTENCE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Saga state document, stored as JSON in the `Data` column.
pub trait SagaData: Serialize + DeserializeOwned + Default + Send + Sync {}

impl<T> SagaData for T where T: Serialize + DeserializeOwned + Default + Send + Sync {}

/// Contents of the `Metadata` column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SagaMetadata {
    /// Id of the message that started the saga.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_message_id: Option<MessageId>,
    /// Reply address of the message that started the saga.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub originator: Option<String>,
}

impl SagaMetadata {
    pub fn from_message(message: &MessageEnvelope) -> Self {
        Self {
            original_message_id: Some(message.message_id()),
            originator: message.reply_to().map(str::to_string),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// An existing instance was loaded.
    Found,
    /// No instance exists and the message starts one; fresh data is ready.
    Started,
    /// No instance exists and the message cannot start one.
    NotFound,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Inserted(SagaId),
    Updated(SagaId),
    Deleted(SagaId),
    /// Nothing to write: no instance, or data identical to what was loaded.
    Unchanged,
    /// A saga started and completed within the same message; never written.
    Discarded,
}

#[derive(Debug)]
struct LoadedSaga {
    id: SagaId,
    token: ConcurrencyToken,
    original: JsonValue,
    correlation: Option<CorrelationValue>,
}

#[derive(Debug)]
enum State {
    Idle,
    Loaded(LoadedSaga),
    Starting { id: SagaId },
    Missing,
}

/// Fetch at most one row; several matches mean the lookup is not unique.
pub(crate) async fn fetch_single(
    conn: &mut dyn SagaConnection,
    cancel: &Cancellation,
    saga: &str,
    statement: &BoundStatement<'_>,
) -> Result<Option<SagaRow>, SagaError> {
    let mut rows = cancel
        .run(conn.fetch(statement))
        .await
        .map_err(|e| SagaError::from_store(saga, e))?;
    match rows.len() {
        0 | 1 => Ok(rows.pop()),
        n => Err(SagaError::Integrity {
            saga: saga.to_string(),
            reason: format!("lookup on {} matched {n} rows", statement.prepared.operation.table()),
        }),
    }
}

/// Storage session for one saga type and one message.
pub struct SagaSession<'s, D> {
    runtime: &'s SagaRuntime,
    conn: &'s mut dyn SagaConnection,
    cancel: Cancellation,
    state: State,
    data: Option<D>,
    metadata: SagaMetadata,
    completed: bool,
}

impl<'s, D: SagaData> SagaSession<'s, D> {
    pub(crate) fn new(runtime: &'s SagaRuntime, conn: &'s mut dyn SagaConnection, cancel: Cancellation) -> Self {
        Self {
            runtime,
            conn,
            cancel,
            state: State::Idle,
            data: None,
            metadata: SagaMetadata::default(),
            completed: false,
        }
    }

    pub fn saga(&self) -> &str {
        self.runtime.name()
    }

    /// Id of the loaded or starting instance.
    pub fn id(&self) -> Option<SagaId> {
        match &self.state {
            State::Loaded(loaded) => Some(loaded.id),
            State::Starting { id } => Some(*id),
            State::Idle | State::Missing => None,
        }
    }

    pub fn data(&self) -> Option<&D> {
        self.data.as_ref()
    }

    pub fn data_mut(&mut self) -> Option<&mut D> {
        self.data.as_mut()
    }

    pub fn metadata(&self) -> &SagaMetadata {
        &self.metadata
    }

    /// Mark the saga finished; its row is deleted (or never written) on commit.
    pub fn mark_completed(&mut self) {
        self.completed = true;
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Locate the saga instance for `message`, or prepare a new one if the
    /// message starts the saga.
    #[instrument(skip(self, message), fields(saga = %self.runtime.name(), message = %message.kind(), outcome), err)]
    pub async fn load(&mut self, message: &MessageEnvelope) -> Result<LoadOutcome, SagaError> {
        self.ensure_idle()?;
        let resolution = self.runtime.resolver.resolve(message)?;
        let row = match &resolution.strategy {
            LookupStrategy::ByCorrelation(value) => self.fetch_by_correlation(value.clone()).await?,
            LookupStrategy::ByFinder(finder) => self.invoke_finder(finder, message).await?,
            LookupStrategy::Create => None,
        };

        let outcome = match row {
            Some(row) => {
                self.accept(row)?;
                LoadOutcome::Found
            }
            None if resolution.starts_saga => {
                self.start(resolution.correlation.as_ref(), message)?;
                LoadOutcome::Started
            }
            None => {
                self.state = State::Missing;
                LoadOutcome::NotFound
            }
        };
        Span::current().record("outcome", tracing::field::debug(&outcome));
        Ok(outcome)
    }

    /// Load an instance by primary key. Never creates.
    #[instrument(skip(self), fields(saga = %self.runtime.name()), err)]
    pub async fn load_by_id(&mut self, id: SagaId) -> Result<LoadOutcome, SagaError> {
        self.ensure_idle()?;
        let bound = BoundStatement::new(&self.runtime.statements.select_by_id).bind(params::ID, *id.as_uuid());
        let row = fetch_single(&mut *self.conn, &self.cancel, self.runtime.name(), &bound).await?;
        self.settle(row)
    }

    /// Load an instance by correlation value. Never creates.
    #[instrument(skip(self, value), fields(saga = %self.runtime.name(), correlation = %value), err)]
    pub async fn load_by_correlation(&mut self, value: CorrelationValue) -> Result<LoadOutcome, SagaError> {
        self.ensure_idle()?;
        let row = self.fetch_by_correlation(value).await?;
        self.settle(row)
    }

    /// Write the outcome of the session into the ambient transaction.
    #[instrument(skip(self), fields(saga = %self.runtime.name(), outcome), err)]
    pub async fn complete(mut self) -> Result<CommitOutcome, SagaError> {
        let outcome = match std::mem::replace(&mut self.state, State::Idle) {
            State::Idle | State::Missing => CommitOutcome::Unchanged,
            State::Starting { .. } if self.completed => CommitOutcome::Discarded,
            State::Starting { id } => self.insert(id).await?,
            State::Loaded(loaded) if self.completed => self.delete(loaded).await?,
            State::Loaded(loaded) => self.update(loaded).await?,
        };
        Span::current().record("outcome", tracing::field::debug(&outcome));
        Ok(outcome)
    }

    fn ensure_idle(&self) -> Result<(), SagaError> {
        match self.state {
            State::Idle => Ok(()),
            _ => Err(SagaError::InvalidState(format!(
                "saga '{}' session already loaded",
                self.runtime.name()
            ))),
        }
    }

    fn settle(&mut self, row: Option<SagaRow>) -> Result<LoadOutcome, SagaError> {
        match row {
            Some(row) => {
                self.accept(row)?;
                Ok(LoadOutcome::Found)
            }
            None => {
                self.state = State::Missing;
                Ok(LoadOutcome::NotFound)
            }
        }
    }

    async fn fetch_by_correlation(&mut self, value: CorrelationValue) -> Result<Option<SagaRow>, SagaError> {
        let runtime = self.runtime;
        let prepared = runtime.statements.select_by_correlation.as_ref().ok_or_else(|| {
            ConfigError::invalid(format!("saga '{}' has no correlation property", runtime.name()))
        })?;
        let bound = BoundStatement::new(prepared).bind(params::CORRELATION_ID, value);
        fetch_single(&mut *self.conn, &self.cancel, runtime.name(), &bound).await
    }

    async fn invoke_finder(
        &mut self,
        finder_id: &FinderId,
        message: &MessageEnvelope,
    ) -> Result<Option<SagaRow>, SagaError> {
        let runtime = self.runtime;
        let finder = runtime.finder(message.kind()).ok_or_else(|| ConfigError::MissingFinder {
            saga: runtime.name().to_string(),
            message: message.kind().to_string(),
            finder: finder_id.to_string(),
        })?;
        debug!(finder = %finder_id, "invoking saga finder");
        let mut ctx = FinderContext::new(runtime.name(), &runtime.statements, &mut *self.conn, &self.cancel);
        let found = finder.find_by(message, &mut ctx).await?;
        Ok(found.map(FoundSaga::into_row))
    }

    fn accept(&mut self, row: SagaRow) -> Result<(), SagaError> {
        let data: D = serde_json::from_value(row.data.clone())?;
        let metadata = match &row.metadata {
            JsonValue::Null => SagaMetadata::default(),
            other => serde_json::from_value(other.clone())?,
        };
        if row.type_version != self.runtime.definition.type_version() {
            debug!(
                stored = %row.type_version,
                current = self.runtime.definition.type_version(),
                "loaded saga written by another saga type version"
            );
        }
        let correlation = self.runtime.correlation_of(&row.data)?;
        self.data = Some(data);
        self.metadata = metadata;
        self.state = State::Loaded(LoadedSaga {
            id: row.id,
            token: row.token,
            original: row.data,
            correlation,
        });
        Ok(())
    }

    fn start(&mut self, correlation: Option<&CorrelationValue>, message: &MessageEnvelope) -> Result<(), SagaError> {
        let mut data = serde_json::to_value(D::default())?;
        if let (Some(property), Some(value), JsonValue::Object(fields)) =
            (self.runtime.definition.correlation(), correlation, &mut data)
        {
            fields.insert(property.name.clone(), value.to_json());
        }
        self.data = Some(serde_json::from_value(data)?);
        self.metadata = SagaMetadata::from_message(message);
        self.state = State::Starting { id: SagaId::new() };
        Ok(())
    }

    fn current_data(&self) -> Result<JsonValue, SagaError> {
        let data = self
            .data
            .as_ref()
            .ok_or_else(|| SagaError::InvalidState("no saga data to persist".to_string()))?;
        Ok(serde_json::to_value(data)?)
    }

    async fn insert(&mut self, id: SagaId) -> Result<CommitOutcome, SagaError> {
        let runtime = self.runtime;
        let data = self.current_data()?;
        let correlation = runtime.correlation_of(&data)?;
        let bound = BoundStatement::new(&runtime.statements.insert)
            .bind(params::ID, *id.as_uuid())
            .bind(params::METADATA, serde_json::to_value(&self.metadata)?)
            .bind(params::DATA, data)
            .bind(params::PERSISTENCE_VERSION, PERSISTENCE_VERSION)
            .bind(params::SAGA_TYPE_VERSION, runtime.definition.type_version())
            .bind(params::CONCURRENCY, ConcurrencyToken::INITIAL.raw());
        let bound = runtime.bind_correlation(bound, correlation.clone());

        match self.cancel.run(self.conn.execute(&bound)).await {
            Ok(_) => {
                debug!(saga_id = %id, "saga inserted");
                Ok(CommitOutcome::Inserted(id))
            }
            Err(StoreError::UniqueViolation(reason)) => {
                warn!(%reason, "saga already started by a concurrent unit of work");
                Err(SagaError::DuplicateStart {
                    saga: runtime.name().to_string(),
                    correlation: correlation.map(|c| c.to_string()).unwrap_or(reason),
                })
            }
            Err(e) => Err(SagaError::from_store(runtime.name(), e)),
        }
    }

    async fn update(&mut self, loaded: LoadedSaga) -> Result<CommitOutcome, SagaError> {
        let runtime = self.runtime;
        let data = self.current_data()?;
        if data == loaded.original {
            return Ok(CommitOutcome::Unchanged);
        }

        let correlation = runtime.correlation_of(&data)?;
        if let Some(previous) = &loaded.correlation {
            if correlation.as_ref() != Some(previous) {
                return Err(SagaError::CorrelationChanged {
                    saga: runtime.name().to_string(),
                    id: loaded.id,
                    from: previous.to_string(),
                    to: correlation.map(|c| c.to_string()).unwrap_or_else(|| "null".to_string()),
                });
            }
        }

        let bound = BoundStatement::new(&runtime.statements.update)
            .bind(params::ID, *loaded.id.as_uuid())
            .bind(params::CONCURRENCY, loaded.token.raw())
            .bind(params::NEW_CONCURRENCY, loaded.token.next().raw())
            .bind(params::DATA, data)
            .bind(params::PERSISTENCE_VERSION, PERSISTENCE_VERSION)
            .bind(params::SAGA_TYPE_VERSION, runtime.definition.type_version());
        let bound = runtime.bind_correlation(bound, correlation);

        let affected = self
            .cancel
            .run(self.conn.execute(&bound))
            .await
            .map_err(|e| SagaError::from_store(runtime.name(), e))?;
        self.expect_one(affected, loaded.id, "update")?;
        Ok(CommitOutcome::Updated(loaded.id))
    }

    async fn delete(&mut self, loaded: LoadedSaga) -> Result<CommitOutcome, SagaError> {
        let runtime = self.runtime;
        let bound = BoundStatement::new(&runtime.statements.delete)
            .bind(params::ID, *loaded.id.as_uuid())
            .bind(params::CONCURRENCY, loaded.token.raw());
        let affected = self
            .cancel
            .run(self.conn.execute(&bound))
            .await
            .map_err(|e| SagaError::from_store(runtime.name(), e))?;
        self.expect_one(affected, loaded.id, "delete")?;
        Ok(CommitOutcome::Deleted(loaded.id))
    }

    fn expect_one(&self, affected: u64, id: SagaId, operation: &str) -> Result<(), SagaError> {
        match affected {
            1 => Ok(()),
            0 => {
                warn!(saga_id = %id, operation, "stale concurrency token");
                Err(SagaError::Conflict {
                    saga: self.runtime.name().to_string(),
                    id,
                })
            }
            n => Err(SagaError::Integrity {
                saga: self.runtime.name().to_string(),
                reason: format!("{operation} of {id} affected {n} rows"),
            }),
        }
    }
}
