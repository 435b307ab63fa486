//! Saga storage layer: sessions, finders, and backend adapters.
//!
//! Statements are rendered once per saga at [`SagaPersister`] build time; a
//! [`SagaSession`] then loads and writes one saga instance through a
//! [`SagaConnection`] bound to the caller's transaction.

pub mod cancel;
pub mod config;
pub mod error;
pub mod finder;
pub mod persister;
pub mod resolver;
pub mod session;
pub mod store;


pub use cancel::{CancelHandle, Cancellation};
pub use config::PersistenceConfig;
pub use error::{ErrorClass, SagaError};
pub use finder::{FinderContext, FinderRegistry, FoundSaga, SagaFinder};
pub use persister::{SagaPersister, SagaPersisterBuilder, SagaRuntime};
pub use resolver::{CorrelationResolver, LookupStrategy, Resolution};
pub use session::{CommitOutcome, LoadOutcome, PERSISTENCE_VERSION, SagaData, SagaMetadata, SagaSession};
pub use store::{
    BoundStatement, InMemorySagaStore, InMemoryTransaction, PgSagaConnection, SagaConnection, SagaRow,
    SqliteSagaConnection, StoreError,
};
