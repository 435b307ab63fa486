//! Abstract operation tree rendered by each dialect.
//!
//! Operations reference parameters by name only; values are bound at
//! execution time against the statement's binding plan.

use sagastore_core::CorrelationType;

/// Parameter names used by the generated saga statements.
pub mod params {
    pub const ID: &str = "Id";
    pub const METADATA: &str = "Metadata";
    pub const DATA: &str = "Data";
    pub const PERSISTENCE_VERSION: &str = "PersistenceVersion";
    pub const SAGA_TYPE_VERSION: &str = "SagaTypeVersion";
    pub const CONCURRENCY: &str = "Concurrency";
    pub const NEW_CONCURRENCY: &str = "NewConcurrency";
    pub const CORRELATION_ID: &str = "CorrelationId";
    pub const DATA_VALUE: &str = "DataValue";
}

/// Columns of a saga table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Column {
    Id,
    Metadata,
    Data,
    PersistenceVersion,
    SagaTypeVersion,
    Concurrency,
    /// Materialised correlation property, named `Correlation_{property}`.
    Correlation(String),
}

impl Column {
    pub fn name(&self) -> String {
        match self {
            Column::Id => "Id".to_string(),
            Column::Metadata => "Metadata".to_string(),
            Column::Data => "Data".to_string(),
            Column::PersistenceVersion => "PersistenceVersion".to_string(),
            Column::SagaTypeVersion => "SagaTypeVersion".to_string(),
            Column::Concurrency => "Concurrency".to_string(),
            Column::Correlation(property) => format!("Correlation_{property}"),
        }
    }

    /// Columns every saga lookup returns, in row order.
    pub fn row() -> Vec<Column> {
        vec![
            Column::Id,
            Column::SagaTypeVersion,
            Column::Concurrency,
            Column::Metadata,
            Column::Data,
        ]
    }
}

/// Storage class of a column, mapped to a concrete type name per dialect.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Id,
    Document,
    Version,
    Token,
    Correlation(CorrelationType),
}

/// Shape of one saga table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub correlation: Option<CorrelationColumn>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationColumn {
    pub property: String,
    pub ty: CorrelationType,
}

impl CorrelationColumn {
    pub fn column(&self) -> Column {
        Column::Correlation(self.property.clone())
    }
}

impl TableSpec {
    /// Ordered column definitions of the table.
    pub fn columns(&self) -> Vec<(Column, ColumnType)> {
        let mut columns = vec![
            (Column::Id, ColumnType::Id),
            (Column::Metadata, ColumnType::Document),
            (Column::Data, ColumnType::Document),
            (Column::PersistenceVersion, ColumnType::Version),
            (Column::SagaTypeVersion, ColumnType::Version),
            (Column::Concurrency, ColumnType::Token),
        ];
        if let Some(correlation) = &self.correlation {
            columns.push((correlation.column(), ColumnType::Correlation(correlation.ty)));
        }
        columns
    }

    /// Name of the unique index on the correlation column, if any.
    pub fn correlation_index(&self) -> Option<String> {
        self.correlation
            .as_ref()
            .map(|c| format!("{}_Correlation_{}", self.name, c.property))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LockHint {
    None,
    /// Lock the selected row for the rest of the ambient transaction.
    ForUpdate,
}

/// Row filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// `column = :param`
    Eq(Column, String),
    And(Vec<Predicate>),
    /// Value at a dotted path inside the `Data` document equals `:param`.
    DataPath { path: String, param: String },
    /// Caller-supplied SQL; `@name` tokens outside string literals become
    /// dialect parameter markers.
    Raw { sql: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Select {
    pub table: String,
    pub columns: Vec<Column>,
    pub filter: Predicate,
    pub lock: LockHint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insert {
    pub table: String,
    pub values: Vec<(Column, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub table: String,
    pub set: Vec<(Column, String)>,
    pub filter: Predicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delete {
    pub table: String,
    pub filter: Predicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Select(Select),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
}

impl Operation {
    pub fn table(&self) -> &str {
        match self {
            Operation::Select(s) => &s.table,
            Operation::Insert(i) => &i.table,
            Operation::Update(u) => &u.table,
            Operation::Delete(d) => &d.table,
        }
    }
}
