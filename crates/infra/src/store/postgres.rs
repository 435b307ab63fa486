use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{PgConnection, Postgres, Row};
use tracing::{Span, instrument};
use uuid::Uuid;

use sagastore_core::{ConcurrencyToken, SagaId};
use sagastore_sql::{Dialect, SqlType, SqlValue};

use super::{BoundStatement, SagaConnection, SagaRow, StoreError};

/// PostgreSQL saga connection.
///
/// Borrows a connection (typically `&mut *tx` of a `sqlx::Transaction`) so
/// every statement joins the caller's transaction.
pub struct PgSagaConnection<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgSagaConnection<'c> {
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }
}

fn bind_all(sql: &str, values: Vec<SqlValue>) -> Query<'_, Postgres, PgArguments> {
    let mut query = sqlx::query(sql);
    for value in values {
        query = match value {
            SqlValue::Null(SqlType::Text) => query.bind(None::<String>),
            SqlValue::Null(SqlType::Int) => query.bind(None::<i64>),
            SqlValue::Null(SqlType::Uuid) => query.bind(None::<Uuid>),
            SqlValue::Null(SqlType::Json) => query.bind(None::<Json<JsonValue>>),
            SqlValue::Text(s) => query.bind(s),
            SqlValue::Int(i) => query.bind(i),
            SqlValue::Uuid(u) => query.bind(u),
            SqlValue::Json(v) => query.bind(Json(v)),
        };
    }
    query
}

fn read_row(row: &PgRow) -> Result<SagaRow, StoreError> {
    let malformed = |e: sqlx::Error| StoreError::MalformedRow(e.to_string());
    let id: Uuid = row.try_get("Id").map_err(malformed)?;
    let concurrency: i64 = row.try_get("Concurrency").map_err(malformed)?;
    let type_version: String = row.try_get("SagaTypeVersion").map_err(malformed)?;
    let Json(metadata): Json<JsonValue> = row.try_get("Metadata").map_err(malformed)?;
    let Json(data): Json<JsonValue> = row.try_get("Data").map_err(malformed)?;
    Ok(SagaRow {
        id: SagaId::from_uuid(id),
        token: ConcurrencyToken::from_raw(concurrency),
        type_version,
        metadata,
        data,
    })
}

#[async_trait]
impl SagaConnection for PgSagaConnection<'_> {
    fn dialect(&self) -> Option<Dialect> {
        Some(Dialect::PostgreSql)
    }

    #[instrument(skip(self, statement), fields(table = statement.prepared.operation.table(), rows), err)]
    async fn fetch(&mut self, statement: &BoundStatement<'_>) -> Result<Vec<SagaRow>, StoreError> {
        let values = statement.ordered_values()?;
        let rows = bind_all(statement.prepared.sql(), values)
            .fetch_all(&mut *self.conn)
            .await
            .map_err(|e| map_sqlx_error("fetch", e))?;
        Span::current().record("rows", rows.len());
        rows.iter().map(read_row).collect()
    }

    #[instrument(skip(self, statement), fields(table = statement.prepared.operation.table(), rows_affected), err)]
    async fn execute(&mut self, statement: &BoundStatement<'_>) -> Result<u64, StoreError> {
        let values = statement.ordered_values()?;
        let result = bind_all(statement.prepared.sql(), values)
            .execute(&mut *self.conn)
            .await
            .map_err(|e| map_sqlx_error("execute", e))?;
        Span::current().record("rows_affected", result.rows_affected());
        Ok(result.rows_affected())
    }
}

/// Map a sqlx error into a [`StoreError`], classifying unique violations.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // unique_violation
                Some("23505") => StoreError::UniqueViolation(msg),
                // serialization_failure, deadlock_detected
                Some("40001") | Some("40P01") => StoreError::backend(operation, msg, true),
                _ => StoreError::backend(operation, msg, false),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            StoreError::backend(operation, err.to_string(), true)
        }
        _ => StoreError::backend(operation, format!("sqlx error: {err}"), false),
    }
}
