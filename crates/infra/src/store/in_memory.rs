use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::warn;
use uuid::Uuid;

use sagastore_core::{ConcurrencyToken, SagaId};
use sagastore_sql::ast::{Column, Predicate, params};
use sagastore_sql::{Dialect, Operation, SqlType, SqlValue};

use super::{BoundStatement, SagaConnection, SagaRow, StoreError};

#[derive(Debug, Clone, PartialEq)]
struct StoredRow {
    id: Uuid,
    metadata: JsonValue,
    data: JsonValue,
    persistence_version: String,
    type_version: String,
    concurrency: i64,
    correlation: BTreeMap<String, SqlValue>,
}

impl StoredRow {
    fn empty(id: Uuid) -> Self {
        Self {
            id,
            metadata: JsonValue::Null,
            data: JsonValue::Null,
            persistence_version: String::new(),
            type_version: String::new(),
            concurrency: 0,
            correlation: BTreeMap::new(),
        }
    }

    fn get(&self, column: &Column) -> SqlValue {
        match column {
            Column::Id => SqlValue::Uuid(self.id),
            Column::Metadata => SqlValue::Json(self.metadata.clone()),
            Column::Data => SqlValue::Json(self.data.clone()),
            Column::PersistenceVersion => SqlValue::Text(self.persistence_version.clone()),
            Column::SagaTypeVersion => SqlValue::Text(self.type_version.clone()),
            Column::Concurrency => SqlValue::Int(self.concurrency),
            Column::Correlation(property) => self
                .correlation
                .get(property)
                .cloned()
                .unwrap_or(SqlValue::Null(SqlType::Text)),
        }
    }

    fn set(&mut self, column: &Column, value: &SqlValue) -> Result<(), StoreError> {
        match column {
            Column::Id => self.id = as_uuid(value)?,
            Column::Metadata => self.metadata = as_json(value)?,
            Column::Data => self.data = as_json(value)?,
            Column::PersistenceVersion => self.persistence_version = as_text(value)?,
            Column::SagaTypeVersion => self.type_version = as_text(value)?,
            Column::Concurrency => match value {
                SqlValue::Int(i) => self.concurrency = *i,
                other => return Err(type_error("Concurrency", other)),
            },
            Column::Correlation(property) => {
                self.correlation.insert(property.clone(), value.clone());
            }
        }
        Ok(())
    }

    fn to_row(&self) -> SagaRow {
        SagaRow {
            id: SagaId::from_uuid(self.id),
            token: ConcurrencyToken::from_raw(self.concurrency),
            type_version: self.type_version.clone(),
            metadata: self.metadata.clone(),
            data: self.data.clone(),
        }
    }
}

fn type_error(column: &str, value: &SqlValue) -> StoreError {
    StoreError::backend("bind", format!("column {column} cannot hold {:?}", value.sql_type()), false)
}

fn as_uuid(value: &SqlValue) -> Result<Uuid, StoreError> {
    match value {
        SqlValue::Uuid(u) => Ok(*u),
        SqlValue::Text(s) => Uuid::parse_str(s).map_err(|_| type_error("Id", value)),
        other => Err(type_error("Id", other)),
    }
}

fn as_json(value: &SqlValue) -> Result<JsonValue, StoreError> {
    match value {
        SqlValue::Json(v) => Ok(v.clone()),
        SqlValue::Text(s) => super::parse_json("document", s),
        other => Err(type_error("document", other)),
    }
}

fn as_text(value: &SqlValue) -> Result<String, StoreError> {
    match value {
        SqlValue::Text(s) => Ok(s.clone()),
        other => Err(type_error("version", other)),
    }
}

/// SQL equality: NULL never matches anything.
fn values_equal(stored: &SqlValue, bound: &SqlValue) -> bool {
    !stored.is_null() && !bound.is_null() && stored.to_json() == bound.to_json()
}

/// Compare a scalar inside the data document with a bound value. Text binds
/// also match numbers and booleans by their textual form, mirroring the
/// text-extracting JSON operators of the SQL dialects.
fn json_matches(found: &JsonValue, bound: &SqlValue) -> bool {
    if bound.is_null() || found.is_null() {
        return false;
    }
    let expected = bound.to_json();
    if *found == expected {
        return true;
    }
    match (found, bound) {
        (JsonValue::Number(_) | JsonValue::Bool(_), SqlValue::Text(text)) => found.to_string() == *text,
        _ => false,
    }
}

fn data_at<'a>(data: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    path.split('.').try_fold(data, |current, segment| current.get(segment))
}

#[derive(Debug)]
enum Undo {
    Inserted { table: String, id: Uuid },
    Restore { table: String, row: StoredRow },
}

impl Undo {
    fn key(&self) -> (&str, Uuid) {
        match self {
            Undo::Inserted { table, id } => (table.as_str(), *id),
            Undo::Restore { table, row } => (table.as_str(), row.id),
        }
    }
}

type TxId = u64;

/// A row plus the uncommitted transaction, if any, that last wrote it.
///
/// A deleted row stays behind as a tombstone until its writer finishes, so
/// its keys stay taken and a rollback can restore it.
#[derive(Debug)]
struct Slot {
    row: StoredRow,
    writer: Option<TxId>,
    deleted: bool,
}

impl Slot {
    fn live(&self) -> bool {
        !self.deleted
    }

    /// Whether `tx` may modify this row: it is committed or already `tx`'s.
    fn writable_by(&self, tx: TxId) -> bool {
        self.live() && self.writer.is_none_or(|writer| writer == tx)
    }
}

type Table = BTreeMap<Uuid, Slot>;

/// In-memory saga table store.
///
/// Intended for tests/dev. Interprets the operation tree directly instead of
/// executing SQL, and enforces the same unique indexes a real table would
/// (primary key, non-null correlation values).
///
/// Writes are visible to other transactions immediately, but a row written
/// by an uncommitted transaction belongs to it: other transactions' updates
/// and deletes skip it, and its keys (including those of rows it deleted)
/// stay reserved until it commits or rolls back. Rollback therefore only
/// ever restores rows nobody else could have touched.
#[derive(Debug, Default)]
pub struct InMemorySagaStore {
    tables: RwLock<HashMap<String, Table>>,
    next_tx: AtomicU64,
}

impl InMemorySagaStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Begin a unit of work against the store.
    pub fn begin(self: &Arc<Self>) -> InMemoryTransaction {
        InMemoryTransaction {
            store: Arc::clone(self),
            id: self.next_tx.fetch_add(1, Ordering::Relaxed) + 1,
            undo: Vec::new(),
            finished: false,
        }
    }

    /// Committed and in-flight rows of a table, ordered by id.
    pub fn rows(&self, table: &str) -> Vec<SagaRow> {
        self.read_tables()
            .get(table)
            .map(|slots| slots.values().filter(|s| s.live()).map(|s| s.row.to_row()).collect())
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.rows(table).len()
    }

    fn read_tables(&self) -> RwLockReadGuard<'_, HashMap<String, Table>> {
        self.tables.read().unwrap_or_else(|poisoned| {
            warn!("in-memory saga store lock poisoned; continuing with recovered state");
            poisoned.into_inner()
        })
    }

    fn write_tables(&self) -> RwLockWriteGuard<'_, HashMap<String, Table>> {
        self.tables.write().unwrap_or_else(|poisoned| {
            warn!("in-memory saga store lock poisoned; continuing with recovered state");
            poisoned.into_inner()
        })
    }

    fn apply(&self, tx: TxId, statement: &BoundStatement<'_>, undo: &mut Vec<Undo>) -> Result<Applied, StoreError> {
        let mut tables = self.write_tables();
        let operation = &statement.prepared.operation;
        let slots = tables.entry(operation.table().to_string()).or_default();

        match operation {
            Operation::Select(select) => {
                let mut found = Vec::new();
                for slot in slots.values().filter(|s| s.live()) {
                    if matches(&slot.row, &select.filter, statement)? {
                        found.push(slot.row.to_row());
                    }
                }
                Ok(Applied::Rows(found))
            }
            Operation::Insert(insert) => {
                let id = as_uuid(statement.arg(params::ID)?)?;
                let mut row = StoredRow::empty(id);
                for (column, param) in &insert.values {
                    row.set(column, statement.arg(param)?)?;
                }
                if slots.contains_key(&row.id) {
                    return Err(StoreError::UniqueViolation(format!("{}: Id {}", insert.table, row.id)));
                }
                check_unique(&insert.table, slots, &row)?;
                undo.push(Undo::Inserted {
                    table: insert.table.clone(),
                    id: row.id,
                });
                slots.insert(
                    row.id,
                    Slot {
                        row,
                        writer: Some(tx),
                        deleted: false,
                    },
                );
                Ok(Applied::Affected(1))
            }
            Operation::Update(update) => {
                let targets = targets(slots, tx, &update.filter, statement)?;
                for id in &targets {
                    let Some(original) = slots.get(id).map(|s| s.row.clone()) else {
                        continue;
                    };
                    let mut changed = original.clone();
                    for (column, param) in &update.set {
                        changed.set(column, statement.arg(param)?)?;
                    }
                    check_unique(&update.table, slots, &changed)?;
                    undo.push(Undo::Restore {
                        table: update.table.clone(),
                        row: original,
                    });
                    if let Some(slot) = slots.get_mut(id) {
                        slot.row = changed;
                        slot.writer = Some(tx);
                    }
                }
                Ok(Applied::Affected(targets.len() as u64))
            }
            Operation::Delete(delete) => {
                let targets = targets(slots, tx, &delete.filter, statement)?;
                for id in &targets {
                    if let Some(slot) = slots.get_mut(id) {
                        undo.push(Undo::Restore {
                            table: delete.table.clone(),
                            row: slot.row.clone(),
                        });
                        slot.deleted = true;
                        slot.writer = Some(tx);
                    }
                }
                Ok(Applied::Affected(targets.len() as u64))
            }
        }
    }

    /// Release `tx`'s rows, dropping the tombstones it left.
    fn release(&self, tx: TxId, undo: &[Undo]) {
        let mut tables = self.write_tables();
        for entry in undo {
            let (table, id) = entry.key();
            let Some(slots) = tables.get_mut(table) else {
                continue;
            };
            match slots.get_mut(&id) {
                Some(slot) if slot.writer == Some(tx) && slot.deleted => {
                    slots.remove(&id);
                }
                Some(slot) if slot.writer == Some(tx) => slot.writer = None,
                _ => {}
            }
        }
    }

    /// Undo a transaction's writes, newest first. Every touched row is still
    /// owned by that transaction, so restoring it cannot clash with another.
    fn revert(&self, undo: Vec<Undo>) {
        let mut tables = self.write_tables();
        for entry in undo.into_iter().rev() {
            match entry {
                Undo::Inserted { table, id } => {
                    if let Some(slots) = tables.get_mut(&table) {
                        slots.remove(&id);
                    }
                }
                Undo::Restore { table, row } => {
                    if let Some(slot) = tables.get_mut(&table).and_then(|slots| slots.get_mut(&row.id)) {
                        slot.row = row;
                        slot.deleted = false;
                        slot.writer = None;
                    }
                }
            }
        }
    }
}

enum Applied {
    Rows(Vec<SagaRow>),
    Affected(u64),
}

/// Rows `tx` may write that satisfy `filter`. Rows held by another open
/// transaction never qualify, so a racing writer affects zero rows.
fn targets(slots: &Table, tx: TxId, filter: &Predicate, statement: &BoundStatement<'_>) -> Result<Vec<Uuid>, StoreError> {
    let mut ids = Vec::new();
    for slot in slots.values().filter(|s| s.live()) {
        if matches(&slot.row, filter, statement)? && slot.writable_by(tx) {
            ids.push(slot.row.id);
        }
    }
    Ok(ids)
}

fn matches(row: &StoredRow, predicate: &Predicate, statement: &BoundStatement<'_>) -> Result<bool, StoreError> {
    match predicate {
        Predicate::Eq(column, param) => Ok(values_equal(&row.get(column), statement.arg(param)?)),
        Predicate::And(parts) => {
            for part in parts {
                if !matches(row, part, statement)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Predicate::DataPath { path, param } => {
            let bound = statement.arg(param)?;
            Ok(data_at(&row.data, path).is_some_and(|found| json_matches(found, bound)))
        }
        Predicate::Raw { .. } => Err(StoreError::Unsupported(
            "raw where clauses need a SQL backend".to_string(),
        )),
    }
}

/// Tombstones count: a deleted row keeps its correlation value reserved
/// until the deleting transaction finishes.
fn check_unique(table: &str, slots: &Table, candidate: &StoredRow) -> Result<(), StoreError> {
    for (property, value) in &candidate.correlation {
        if value.is_null() {
            continue;
        }
        let clash = slots
            .values()
            .filter(|other| other.row.id != candidate.id)
            .any(|other| other.row.correlation.get(property).is_some_and(|v| values_equal(v, value)));
        if clash {
            return Err(StoreError::UniqueViolation(format!(
                "{table}_Correlation_{property}: {}",
                value.to_json()
            )));
        }
    }
    Ok(())
}

/// Unit of work on an [`InMemorySagaStore`].
///
/// Dropping the transaction without committing rolls it back.
#[derive(Debug)]
pub struct InMemoryTransaction {
    store: Arc<InMemorySagaStore>,
    id: TxId,
    undo: Vec<Undo>,
    finished: bool,
}

impl InMemoryTransaction {
    pub fn commit(mut self) {
        self.finished = true;
        let undo = std::mem::take(&mut self.undo);
        self.store.release(self.id, &undo);
    }

    pub fn rollback(mut self) {
        self.revert();
    }

    fn revert(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.store.revert(std::mem::take(&mut self.undo));
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        self.revert();
    }
}

#[async_trait]
impl SagaConnection for InMemoryTransaction {
    fn dialect(&self) -> Option<Dialect> {
        None
    }

    async fn fetch(&mut self, statement: &BoundStatement<'_>) -> Result<Vec<SagaRow>, StoreError> {
        match self.store.apply(self.id, statement, &mut self.undo)? {
            Applied::Rows(rows) => Ok(rows),
            Applied::Affected(_) => Err(StoreError::Unsupported("fetch on a write statement".to_string())),
        }
    }

    async fn execute(&mut self, statement: &BoundStatement<'_>) -> Result<u64, StoreError> {
        match self.store.apply(self.id, statement, &mut self.undo)? {
            Applied::Affected(n) => Ok(n),
            Applied::Rows(_) => Err(StoreError::Unsupported("execute on a select".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sagastore_core::{CorrelationType, SagaDefinition};
    use sagastore_sql::{SagaStatements, ScriptGenerator};
    use serde_json::json;

    fn statements() -> SagaStatements {
        let def = SagaDefinition::builder("OrderSaga")
            .correlation("OrderId", CorrelationType::String)
            .started_by("StartOrder", Some("OrderId"))
            .build()
            .unwrap();
        ScriptGenerator::new(Dialect::PostgreSql, "").statements(&def).unwrap()
    }

    fn insert<'a>(s: &'a SagaStatements, id: Uuid, order: &str) -> BoundStatement<'a> {
        BoundStatement::new(&s.insert)
            .bind("Id", id)
            .bind("Metadata", json!({}))
            .bind("Data", json!({ "OrderId": order, "Total": 10 }))
            .bind("PersistenceVersion", "0.1.0")
            .bind("SagaTypeVersion", "1.0.0")
            .bind("Concurrency", 1i64)
            .bind("CorrelationId", order)
    }

    #[tokio::test]
    async fn correlation_values_are_unique() {
        let store = InMemorySagaStore::new();
        let s = statements();
        let mut tx = store.begin();
        assert_eq!(tx.execute(&insert(&s, Uuid::now_v7(), "A")).await.unwrap(), 1);
        let err = tx.execute(&insert(&s, Uuid::now_v7(), "A")).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
        tx.commit();
        assert_eq!(store.row_count("OrderSaga"), 1);
    }

    #[tokio::test]
    async fn null_correlations_do_not_collide() {
        let store = InMemorySagaStore::new();
        let s = statements();
        let mut tx = store.begin();
        for _ in 0..2 {
            let stmt = insert(&s, Uuid::now_v7(), "x").bind("CorrelationId", SqlValue::Null(SqlType::Text));
            tx.execute(&stmt).await.unwrap();
        }
        tx.commit();
        assert_eq!(store.row_count("OrderSaga"), 2);
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = InMemorySagaStore::new();
        let s = statements();
        let id = Uuid::now_v7();
        {
            let mut tx = store.begin();
            tx.execute(&insert(&s, id, "A")).await.unwrap();
            tx.commit();
        }
        {
            let mut tx = store.begin();
            let update = BoundStatement::new(&s.update)
                .bind("Id", id)
                .bind("Concurrency", 1i64)
                .bind("NewConcurrency", 2i64)
                .bind("Data", json!({ "OrderId": "A", "Total": 99 }))
                .bind("PersistenceVersion", "0.1.0")
                .bind("SagaTypeVersion", "1.0.0")
                .bind("CorrelationId", "A");
            assert_eq!(tx.execute(&update).await.unwrap(), 1);
            tx.execute(&insert(&s, Uuid::now_v7(), "B")).await.unwrap();
        }
        let rows = store.rows("OrderSaga");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].token, ConcurrencyToken::INITIAL);
        assert_eq!(rows[0].data["Total"], 10);
    }

    fn update<'a>(s: &'a SagaStatements, id: Uuid, token: i64, total: i64) -> BoundStatement<'a> {
        BoundStatement::new(&s.update)
            .bind("Id", id)
            .bind("Concurrency", token)
            .bind("NewConcurrency", token + 1)
            .bind("Data", json!({ "OrderId": "A", "Total": total }))
            .bind("PersistenceVersion", "0.1.0")
            .bind("SagaTypeVersion", "1.0.0")
            .bind("CorrelationId", "A")
    }

    fn delete(s: &SagaStatements, id: Uuid, token: i64) -> BoundStatement<'_> {
        BoundStatement::new(&s.delete).bind("Id", id).bind("Concurrency", token)
    }

    async fn committed_order(store: &Arc<InMemorySagaStore>, s: &SagaStatements, order: &str) -> Uuid {
        let id = Uuid::now_v7();
        let mut tx = store.begin();
        tx.execute(&insert(s, id, order)).await.unwrap();
        tx.commit();
        id
    }

    async fn by_correlation(store: &Arc<InMemorySagaStore>, s: &SagaStatements, order: &str) -> Vec<SagaRow> {
        let select = s.select_by_correlation.as_ref().unwrap();
        let mut tx = store.begin();
        tx.fetch(&BoundStatement::new(select).bind("CorrelationId", order))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn uncommitted_delete_keeps_correlation_reserved() {
        let store = InMemorySagaStore::new();
        let s = statements();
        let id = committed_order(&store, &s, "A").await;

        let mut deleting = store.begin();
        assert_eq!(deleting.execute(&delete(&s, id, 1)).await.unwrap(), 1);
        assert!(by_correlation(&store, &s, "A").await.is_empty());

        let mut racing = store.begin();
        let err = racing.execute(&insert(&s, Uuid::now_v7(), "A")).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)), "{err:?}");
        racing.commit();

        deleting.rollback();
        let rows = by_correlation(&store, &s, "A").await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, SagaId::from_uuid(id));
    }

    #[tokio::test]
    async fn committed_delete_frees_correlation() {
        let store = InMemorySagaStore::new();
        let s = statements();
        let id = committed_order(&store, &s, "A").await;

        let mut deleting = store.begin();
        deleting.execute(&delete(&s, id, 1)).await.unwrap();
        deleting.commit();

        let replacement = committed_order(&store, &s, "A").await;
        let rows = by_correlation(&store, &s, "A").await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, SagaId::from_uuid(replacement));
    }

    #[tokio::test]
    async fn rows_written_by_open_transactions_are_not_writable_elsewhere() {
        let store = InMemorySagaStore::new();
        let s = statements();
        let id = committed_order(&store, &s, "A").await;

        let mut first = store.begin();
        assert_eq!(first.execute(&update(&s, id, 1, 20)).await.unwrap(), 1);

        // The second writer sees the new token but may not build on it.
        let mut second = store.begin();
        assert_eq!(second.execute(&update(&s, id, 2, 30)).await.unwrap(), 0);
        assert_eq!(second.execute(&delete(&s, id, 2)).await.unwrap(), 0);
        second.commit();

        first.rollback();
        let rows = store.rows("OrderSaga");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].token, ConcurrencyToken::INITIAL);
        assert_eq!(rows[0].data["Total"], 10);

        let mut third = store.begin();
        assert_eq!(third.execute(&update(&s, id, 1, 40)).await.unwrap(), 1);
        third.commit();
        let mut fourth = store.begin();
        assert_eq!(fourth.execute(&update(&s, id, 2, 50)).await.unwrap(), 1);
        fourth.commit();
        assert_eq!(store.rows("OrderSaga")[0].data["Total"], 50);
    }

    #[tokio::test]
    async fn poisoned_lock_still_reads_and_rolls_back() {
        let store = InMemorySagaStore::new();
        let s = statements();
        committed_order(&store, &s, "A").await;
        let mut tx = store.begin();
        tx.execute(&insert(&s, Uuid::now_v7(), "B")).await.unwrap();

        let poisoner = Arc::clone(&store);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.tables.write().unwrap();
            panic!("poison the table lock");
        })
        .join();
        assert!(store.tables.is_poisoned());

        assert_eq!(store.row_count("OrderSaga"), 2);
        tx.rollback();
        assert_eq!(store.row_count("OrderSaga"), 1);
    }

    #[tokio::test]
    async fn data_path_matches_text_binds_against_numbers() {
        let store = InMemorySagaStore::new();
        let s = statements();
        let mut tx = store.begin();
        tx.execute(&insert(&s, Uuid::now_v7(), "A")).await.unwrap();

        let by_total = s.select_by_data("Total").unwrap();
        let rows = tx
            .fetch(&BoundStatement::new(&by_total).bind("DataValue", "10"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        let rows = tx
            .fetch(&BoundStatement::new(&by_total).bind("DataValue", 11i64))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn raw_predicates_are_unsupported() {
        let store = InMemorySagaStore::new();
        let s = statements();
        let raw = s.select_where("1 = 1").unwrap();
        let mut tx = store.begin();
        let err = tx.fetch(&BoundStatement::new(&raw)).await.unwrap_err();
        assert!(matches!(err, StoreError::Unsupported(_)));
    }
}
