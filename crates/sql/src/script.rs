//! Script Generator: per saga definition × dialect DDL and DML.

use sagastore_core::{ConfigResult, SagaDefinition};
use tracing::debug;

use crate::ast::{
    Column, CorrelationColumn, Delete, Insert, LockHint, Operation, Predicate, Select, TableSpec, Update, params,
};
use crate::dialect::Dialect;
use crate::render::{Statement, render, render_create_table, render_drop_table, validate_table};

/// An operation together with its rendering for one dialect.
///
/// SQL backends execute `statement`; the in-memory backend interprets
/// `operation` directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStatement {
    pub operation: Operation,
    pub statement: Statement,
}

impl PreparedStatement {
    pub fn prepare(dialect: Dialect, operation: Operation) -> ConfigResult<Self> {
        let statement = render(dialect, &operation)?;
        Ok(Self { operation, statement })
    }

    pub fn sql(&self) -> &str {
        &self.statement.sql
    }

    pub fn bindings(&self) -> &[String] {
        &self.statement.bindings
    }
}

/// Every statement needed to operate one saga on one dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaStatements {
    pub dialect: Dialect,
    pub table: TableSpec,
    pub select_by_id: PreparedStatement,
    /// Absent for finder-only sagas.
    pub select_by_correlation: Option<PreparedStatement>,
    pub insert: PreparedStatement,
    pub update: PreparedStatement,
    pub delete: PreparedStatement,
}

impl SagaStatements {
    /// Lookup on a dotted path of the `Data` document, bound to `params::DATA_VALUE`.
    pub fn select_by_data(&self, path: &str) -> ConfigResult<PreparedStatement> {
        PreparedStatement::prepare(
            self.dialect,
            Operation::Select(Select {
                table: self.table.name.clone(),
                columns: Column::row(),
                filter: Predicate::DataPath {
                    path: path.to_string(),
                    param: params::DATA_VALUE.to_string(),
                },
                lock: LockHint::ForUpdate,
            }),
        )
    }

    /// Lookup with a caller-written where clause (`@name` parameter tokens).
    pub fn select_where(&self, where_clause: &str) -> ConfigResult<PreparedStatement> {
        PreparedStatement::prepare(
            self.dialect,
            Operation::Select(Select {
                table: self.table.name.clone(),
                columns: Column::row(),
                filter: Predicate::Raw {
                    sql: where_clause.to_string(),
                },
                lock: LockHint::ForUpdate,
            }),
        )
    }
}

/// Create and drop scripts for one saga on one dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaScripts {
    pub saga: String,
    pub dialect: Dialect,
    pub create: String,
    pub drop: String,
}

/// Generates scripts and statements; dialect-agnostic apart from the renderer.
#[derive(Debug, Clone)]
pub struct ScriptGenerator {
    dialect: Dialect,
    table_prefix: String,
}

impl ScriptGenerator {
    pub fn new(dialect: Dialect, table_prefix: impl Into<String>) -> Self {
        Self {
            dialect,
            table_prefix: table_prefix.into(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Deterministic table name: `{prefix}{saga name}`.
    pub fn table_name(&self, definition: &SagaDefinition) -> String {
        format!("{}{}", self.table_prefix, definition.name())
    }

    pub fn table_spec(&self, definition: &SagaDefinition) -> TableSpec {
        TableSpec {
            name: self.table_name(definition),
            correlation: definition.correlation().map(|c| CorrelationColumn {
                property: c.name.clone(),
                ty: c.ty,
            }),
        }
    }

    pub fn scripts(&self, definition: &SagaDefinition) -> ConfigResult<SagaScripts> {
        let table = self.table_spec(definition);
        Ok(SagaScripts {
            saga: definition.name().to_string(),
            dialect: self.dialect,
            create: render_create_table(self.dialect, &table)?,
            drop: render_drop_table(self.dialect, &table)?,
        })
    }

    pub fn statements(&self, definition: &SagaDefinition) -> ConfigResult<SagaStatements> {
        let table = self.table_spec(definition);
        validate_table(self.dialect, &table)?;
        let name = table.name.clone();
        let correlation = table.correlation.as_ref().map(CorrelationColumn::column);

        let select_by_id = PreparedStatement::prepare(
            self.dialect,
            Operation::Select(Select {
                table: name.clone(),
                columns: Column::row(),
                filter: Predicate::Eq(Column::Id, params::ID.to_string()),
                lock: LockHint::ForUpdate,
            }),
        )?;

        let select_by_correlation = correlation
            .as_ref()
            .map(|column| {
                PreparedStatement::prepare(
                    self.dialect,
                    Operation::Select(Select {
                        table: name.clone(),
                        columns: Column::row(),
                        filter: Predicate::Eq(column.clone(), params::CORRELATION_ID.to_string()),
                        lock: LockHint::ForUpdate,
                    }),
                )
            })
            .transpose()?;

        let mut values = vec![
            (Column::Id, params::ID.to_string()),
            (Column::Metadata, params::METADATA.to_string()),
            (Column::Data, params::DATA.to_string()),
            (Column::PersistenceVersion, params::PERSISTENCE_VERSION.to_string()),
            (Column::SagaTypeVersion, params::SAGA_TYPE_VERSION.to_string()),
            (Column::Concurrency, params::CONCURRENCY.to_string()),
        ];
        if let Some(column) = &correlation {
            values.push((column.clone(), params::CORRELATION_ID.to_string()));
        }
        let insert = PreparedStatement::prepare(
            self.dialect,
            Operation::Insert(Insert {
                table: name.clone(),
                values,
            }),
        )?;

        let mut set = vec![
            (Column::Data, params::DATA.to_string()),
            (Column::PersistenceVersion, params::PERSISTENCE_VERSION.to_string()),
            (Column::SagaTypeVersion, params::SAGA_TYPE_VERSION.to_string()),
            (Column::Concurrency, params::NEW_CONCURRENCY.to_string()),
        ];
        if let Some(column) = &correlation {
            set.push((column.clone(), params::CORRELATION_ID.to_string()));
        }
        let token_guard = Predicate::And(vec![
            Predicate::Eq(Column::Id, params::ID.to_string()),
            Predicate::Eq(Column::Concurrency, params::CONCURRENCY.to_string()),
        ]);
        let update = PreparedStatement::prepare(
            self.dialect,
            Operation::Update(Update {
                table: name.clone(),
                set,
                filter: token_guard.clone(),
            }),
        )?;

        let delete = PreparedStatement::prepare(
            self.dialect,
            Operation::Delete(Delete {
                table: name,
                filter: token_guard,
            }),
        )?;

        debug!(saga = definition.name(), dialect = %self.dialect, "rendered saga statements");

        Ok(SagaStatements {
            dialect: self.dialect,
            table,
            select_by_id,
            select_by_correlation,
            insert,
            update,
            delete,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sagastore_core::{ConfigError, CorrelationType};

    fn order_saga() -> SagaDefinition {
        SagaDefinition::builder("OrderSaga")
            .correlation("OrderId", CorrelationType::Guid)
            .started_by("StartOrder", Some("OrderId"))
            .build()
            .unwrap()
    }

    fn finder_saga() -> SagaDefinition {
        SagaDefinition::builder("TestSaga")
            .started_by("StartSagaMessage", None)
            .finder("StartSagaMessage", "FindByStart")
            .build()
            .unwrap()
    }

    #[test]
    fn update_is_guarded_by_token() {
        let statements = ScriptGenerator::new(Dialect::MsSqlServer, "Sales_")
            .statements(&order_saga())
            .unwrap();
        assert_eq!(
            statements.update.sql(),
            "update [Sales_OrderSaga] set [Data] = @Data, [PersistenceVersion] = @PersistenceVersion, \
             [SagaTypeVersion] = @SagaTypeVersion, [Concurrency] = @NewConcurrency, \
             [Correlation_OrderId] = @CorrelationId where [Id] = @Id and [Concurrency] = @Concurrency"
        );
        assert_eq!(
            statements.delete.sql(),
            "delete from [Sales_OrderSaga] where [Id] = @Id and [Concurrency] = @Concurrency"
        );
    }

    #[test]
    fn postgres_insert_binds_in_column_order() {
        let statements = ScriptGenerator::new(Dialect::PostgreSql, "")
            .statements(&order_saga())
            .unwrap();
        assert_eq!(
            statements.insert.bindings(),
            &["Id", "Metadata", "Data", "PersistenceVersion", "SagaTypeVersion", "Concurrency", "CorrelationId"]
        );
        assert!(statements.insert.sql().ends_with("values ($1, $2, $3, $4, $5, $6, $7)"));
    }

    #[test]
    fn finder_only_saga_has_no_correlation_column_or_index() {
        for dialect in Dialect::ALL {
            let generator = ScriptGenerator::new(dialect, "");
            let statements = generator.statements(&finder_saga()).unwrap();
            assert!(statements.select_by_correlation.is_none());
            let scripts = generator.scripts(&finder_saga()).unwrap();
            assert!(!scripts.create.to_lowercase().contains("correlation"), "{dialect}: {}", scripts.create);
            assert!(!scripts.create.contains("unique"), "{dialect}");
        }
    }

    #[test]
    fn create_scripts_are_guarded() {
        let def = order_saga();
        let pg = ScriptGenerator::new(Dialect::PostgreSql, "").scripts(&def).unwrap();
        assert!(pg.create.contains("create table if not exists \"OrderSaga\""));
        assert!(pg.create.contains(
            "create unique index if not exists \"OrderSaga_Correlation_OrderId\" on \"OrderSaga\" (\"Correlation_OrderId\")"
        ));
        assert!(pg.create.contains("\"Correlation_OrderId\" uuid"));

        let mssql = ScriptGenerator::new(Dialect::MsSqlServer, "").scripts(&def).unwrap();
        assert!(mssql.create.starts_with("if not exists ("));
        assert!(mssql.create.contains("where [Correlation_OrderId] is not null"));

        let mysql = ScriptGenerator::new(Dialect::MySql, "").scripts(&def).unwrap();
        assert!(mysql.create.contains("unique key `OrderSaga_Correlation_OrderId` (`Correlation_OrderId`)"));

        let oracle = ScriptGenerator::new(Dialect::Oracle, "").scripts(&def).unwrap();
        assert!(oracle.create.contains("where table_name = 'ORDERSAGA'"));
        assert!(oracle.drop.contains("execute immediate 'drop table \"ORDERSAGA\"'"));
    }

    #[test]
    fn oracle_identifier_limit_is_a_configuration_error() {
        let generator = ScriptGenerator::new(Dialect::Oracle, "LongEndpointName_");
        let err = generator.statements(&order_saga()).unwrap_err();
        assert!(matches!(err, ConfigError::Unsupported { .. }));
        assert!(generator.scripts(&order_saga()).is_err());
    }

    #[test]
    fn data_lookup_renders_on_demand() {
        let statements = ScriptGenerator::new(Dialect::Sqlite, "")
            .statements(&finder_saga())
            .unwrap();
        let by_data = statements.select_by_data("Property").unwrap();
        assert!(by_data.sql().contains("json_extract(\"Data\", '$.Property') = ?"));
        assert_eq!(by_data.bindings(), &["DataValue"]);
    }
}
