use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection};
use tracing::{Span, instrument};
use uuid::Uuid;

use sagastore_core::{ConcurrencyToken, SagaId};
use sagastore_sql::{Dialect, SqlType, SqlValue};

use super::{BoundStatement, SagaConnection, SagaRow, StoreError, parse_json};

/// SQLite saga connection.
///
/// Ids and documents are stored as text; the correlation column keeps the
/// declared affinity (`integer` for int correlations).
pub struct SqliteSagaConnection<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> SqliteSagaConnection<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }
}

fn bind_all(sql: &str, values: Vec<SqlValue>) -> Query<'_, Sqlite, SqliteArguments<'_>> {
    let mut query = sqlx::query(sql);
    for value in values {
        query = match value {
            SqlValue::Null(SqlType::Int) => query.bind(None::<i64>),
            SqlValue::Null(_) => query.bind(None::<String>),
            SqlValue::Text(s) => query.bind(s),
            SqlValue::Int(i) => query.bind(i),
            SqlValue::Uuid(u) => query.bind(u.to_string()),
            SqlValue::Json(v) => query.bind(v.to_string()),
        };
    }
    query
}

fn read_row(row: &SqliteRow) -> Result<SagaRow, StoreError> {
    let malformed = |e: sqlx::Error| StoreError::MalformedRow(e.to_string());
    let id: String = row.try_get("Id").map_err(malformed)?;
    let id = Uuid::parse_str(&id).map_err(|e| StoreError::MalformedRow(format!("column Id: {e}")))?;
    let concurrency: i64 = row.try_get("Concurrency").map_err(malformed)?;
    let type_version: String = row.try_get("SagaTypeVersion").map_err(malformed)?;
    let metadata: String = row.try_get("Metadata").map_err(malformed)?;
    let data: String = row.try_get("Data").map_err(malformed)?;
    Ok(SagaRow {
        id: SagaId::from_uuid(id),
        token: ConcurrencyToken::from_raw(concurrency),
        type_version,
        metadata: parse_json("Metadata", &metadata)?,
        data: parse_json("Data", &data)?,
    })
}

#[async_trait]
impl SagaConnection for SqliteSagaConnection<'_> {
    fn dialect(&self) -> Option<Dialect> {
        Some(Dialect::Sqlite)
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

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            if db_err.is_unique_violation() {
                StoreError::UniqueViolation(msg)
            } else {
                // SQLITE_BUSY / SQLITE_LOCKED clear up once the other writer finishes.
                let transient = matches!(db_err.code().as_deref(), Some("5") | Some("6"));
                StoreError::backend(operation, msg, transient)
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            StoreError::backend(operation, err.to_string(), true)
        }
        _ => StoreError::backend(operation, format!("sqlx error: {err}"), false),
    }
}
