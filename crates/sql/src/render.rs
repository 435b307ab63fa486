//! Interpreter turning an [`Operation`] into dialect SQL plus a binding plan.

use sagastore_core::{ConfigError, ConfigResult};

use crate::ast::{Column, Delete, Insert, Operation, Predicate, Select, TableSpec, Update};
use crate::dialect::{Dialect, MarkerStyle};

/// Rendered SQL text and the parameter names to bind, in binding order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub bindings: Vec<String>,
}

/// Render a DML operation for `dialect`.
pub fn render(dialect: Dialect, operation: &Operation) -> ConfigResult<Statement> {
    let mut renderer = Renderer::new(dialect);
    let sql = match operation {
        Operation::Select(select) => renderer.select(select)?,
        Operation::Insert(insert) => renderer.insert(insert)?,
        Operation::Update(update) => renderer.update(update)?,
        Operation::Delete(delete) => renderer.delete(delete)?,
    };
    Ok(Statement {
        sql,
        bindings: renderer.bindings,
    })
}

/// Check every identifier of a table against the dialect's limits.
pub fn validate_table(dialect: Dialect, table: &TableSpec) -> ConfigResult<()> {
    dialect.identifier(&table.name)?;
    if let Some(index) = table.correlation_index() {
        dialect.identifier(&index)?;
    }
    for (column, _) in table.columns() {
        dialect.identifier(&column.name())?;
    }
    Ok(())
}

/// Render the idempotent create script for a table.
pub fn render_create_table(dialect: Dialect, table: &TableSpec) -> ConfigResult<String> {
    validate_table(dialect, table)?;
    let d = dialect.sql();
    let mut columns = Vec::new();
    for (column, ty) in table.columns() {
        let name = dialect.identifier(&column.name())?;
        let constraint = match column {
            Column::Id => " not null primary key",
            Column::Correlation(_) => "",
            _ => " not null",
        };
        columns.push(format!("{name} {}{constraint}", d.column_type(ty)));
    }
    Ok(d.create_table(table, &columns))
}

/// Render the idempotent drop script for a table.
pub fn render_drop_table(dialect: Dialect, table: &TableSpec) -> ConfigResult<String> {
    dialect.identifier(&table.name)?;
    Ok(dialect.sql().drop_table(table))
}

struct Renderer {
    dialect: Dialect,
    bindings: Vec<String>,
}

impl Renderer {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            bindings: Vec::new(),
        }
    }

    fn ident(&self, name: &str) -> ConfigResult<String> {
        self.dialect.identifier(name)
    }

    fn column(&self, column: &Column) -> ConfigResult<String> {
        self.ident(&column.name())
    }

    fn marker(&mut self, name: &str) -> String {
        match self.dialect.sql().marker_style() {
            MarkerStyle::Named(prefix) => {
                if !self.bindings.iter().any(|b| b == name) {
                    self.bindings.push(name.to_string());
                }
                format!("{prefix}{name}")
            }
            MarkerStyle::Numbered => {
                let index = match self.bindings.iter().position(|b| b == name) {
                    Some(index) => index,
                    None => {
                        self.bindings.push(name.to_string());
                        self.bindings.len() - 1
                    }
                };
                format!("${}", index + 1)
            }
            MarkerStyle::Positional => {
                self.bindings.push(name.to_string());
                "?".to_string()
            }
        }
    }

    fn select(&mut self, select: &Select) -> ConfigResult<String> {
        let d = self.dialect.sql();
        let columns = select
            .columns
            .iter()
            .map(|c| self.column(c))
            .collect::<ConfigResult<Vec<_>>>()?;
        let mut sql = format!("select {} from {}", columns.join(", "), self.ident(&select.table)?);
        if let Some(hint) = d.table_lock_hint(select.lock) {
            sql.push(' ');
            sql.push_str(hint);
        }
        sql.push_str(" where ");
        sql.push_str(&self.predicate(&select.filter)?);
        if let Some(clause) = d.trailing_lock_clause(select.lock) {
            sql.push(' ');
            sql.push_str(clause);
        }
        Ok(sql)
    }

    fn insert(&mut self, insert: &Insert) -> ConfigResult<String> {
        let mut columns = Vec::with_capacity(insert.values.len());
        let mut markers = Vec::with_capacity(insert.values.len());
        for (column, param) in &insert.values {
            columns.push(self.column(column)?);
            markers.push(self.marker(param));
        }
        Ok(format!(
            "insert into {} ({}) values ({})",
            self.ident(&insert.table)?,
            columns.join(", "),
            markers.join(", ")
        ))
    }

    fn update(&mut self, update: &Update) -> ConfigResult<String> {
        let mut assignments = Vec::with_capacity(update.set.len());
        for (column, param) in &update.set {
            let column = self.column(column)?;
            assignments.push(format!("{column} = {}", self.marker(param)));
        }
        let table = self.ident(&update.table)?;
        let filter = self.predicate(&update.filter)?;
        Ok(format!("update {table} set {} where {filter}", assignments.join(", ")))
    }

    fn delete(&mut self, delete: &Delete) -> ConfigResult<String> {
        let table = self.ident(&delete.table)?;
        let filter = self.predicate(&delete.filter)?;
        Ok(format!("delete from {table} where {filter}"))
    }

    fn predicate(&mut self, predicate: &Predicate) -> ConfigResult<String> {
        match predicate {
            Predicate::Eq(column, param) => {
                let column = self.column(column)?;
                Ok(format!("{column} = {}", self.marker(param)))
            }
            Predicate::And(parts) => {
                let rendered = parts
                    .iter()
                    .map(|p| self.predicate(p))
                    .collect::<ConfigResult<Vec<_>>>()?;
                Ok(rendered.join(" and "))
            }
            Predicate::DataPath { path, param } => {
                sagastore_core::definition::validate_path(path)?;
                let data = self.column(&Column::Data)?;
                let segments: Vec<&str> = path.split('.').collect();
                let expr = self.dialect.sql().json_path(&data, &segments);
                Ok(format!("{expr} = {}", self.marker(param)))
            }
            Predicate::Raw { sql } => self.raw(sql),
        }
    }

    /// Copy caller SQL, rewriting `@name` tokens outside quoted literals into markers.
    fn raw(&mut self, sql: &str) -> ConfigResult<String> {
        let mut out = String::with_capacity(sql.len());
        let mut chars = sql.chars().peekable();
        let mut in_literal = false;

        while let Some(c) = chars.next() {
            if c == '\'' {
                in_literal = !in_literal;
                out.push(c);
                continue;
            }
            if c == '@' && !in_literal {
                let mut name = String::new();
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        name.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if name.is_empty() {
                    return Err(ConfigError::invalid(format!("dangling '@' in where clause: {sql}")));
                }
                out.push_str(&self.marker(&name));
                continue;
            }
            out.push(c);
        }

        if in_literal {
            return Err(ConfigError::invalid(format!("unterminated literal in where clause: {sql}")));
        }
        Ok(format!("({out})"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{LockHint, params};
    use proptest::prelude::*;

    fn select_by_id(table: &str) -> Operation {
        Operation::Select(Select {
            table: table.to_string(),
            columns: Column::row(),
            filter: Predicate::Eq(Column::Id, params::ID.to_string()),
            lock: LockHint::ForUpdate,
        })
    }

    #[test]
    fn lock_placement_follows_dialect() {
        let mssql = render(Dialect::MsSqlServer, &select_by_id("OrderSaga")).unwrap();
        assert_eq!(
            mssql.sql,
            "select [Id], [SagaTypeVersion], [Concurrency], [Metadata], [Data] from [OrderSaga] with (updlock, rowlock) where [Id] = @Id"
        );

        let pg = render(Dialect::PostgreSql, &select_by_id("OrderSaga")).unwrap();
        assert!(pg.sql.ends_with("where \"Id\" = $1 for update"));

        let sqlite = render(Dialect::Sqlite, &select_by_id("OrderSaga")).unwrap();
        assert!(sqlite.sql.ends_with("where \"Id\" = ?"));
    }

    #[test]
    fn numbered_markers_reuse_names() {
        let op = Operation::Select(Select {
            table: "T".into(),
            columns: vec![Column::Id],
            filter: Predicate::Raw {
                sql: "@a = 1 or @b = @a".into(),
            },
            lock: LockHint::None,
        });
        let pg = render(Dialect::PostgreSql, &op).unwrap();
        assert_eq!(pg.sql, "select \"Id\" from \"T\" where ($1 = 1 or $2 = $1)");
        assert_eq!(pg.bindings, vec!["a", "b"]);

        let mysql = render(Dialect::MySql, &op).unwrap();
        assert_eq!(mysql.bindings, vec!["a", "b", "a"]);
    }

    #[test]
    fn raw_where_clause_keeps_literals() {
        let op = Operation::Select(Select {
            table: "TestSaga".into(),
            columns: vec![Column::Id],
            filter: Predicate::Raw {
                sql: "json_value(Data,'$.Property') = @propertyValue and Data <> '@literal'".into(),
            },
            lock: LockHint::None,
        });
        let stmt = render(Dialect::MsSqlServer, &op).unwrap();
        assert!(stmt.sql.contains("= @propertyValue and Data <> '@literal'"));
        assert_eq!(stmt.bindings, vec!["propertyValue"]);
    }

    #[test]
    fn raw_where_clause_rejects_unterminated_literal() {
        let op = Operation::Select(Select {
            table: "T".into(),
            columns: vec![Column::Id],
            filter: Predicate::Raw { sql: "x = 'oops".into() },
            lock: LockHint::None,
        });
        assert!(render(Dialect::Sqlite, &op).is_err());
    }

    #[test]
    fn data_path_per_dialect() {
        let op = Operation::Select(Select {
            table: "T".into(),
            columns: vec![Column::Id],
            filter: Predicate::DataPath {
                path: "Order.Property".into(),
                param: params::DATA_VALUE.into(),
            },
            lock: LockHint::None,
        });
        let pg = render(Dialect::PostgreSql, &op).unwrap();
        assert!(pg.sql.contains("\"Data\" #>> '{Order,Property}' = $1"));
        let mssql = render(Dialect::MsSqlServer, &op).unwrap();
        assert!(mssql.sql.contains("json_value([Data], '$.Order.Property') = @DataValue"));
        let sqlite = render(Dialect::Sqlite, &op).unwrap();
        assert!(sqlite.sql.contains("json_extract(\"Data\", '$.Order.Property') = ?"));
    }

    #[test]
    fn data_path_rejects_injection() {
        let op = Operation::Select(Select {
            table: "T".into(),
            columns: vec![Column::Id],
            filter: Predicate::DataPath {
                path: "a') or 1=1 --".into(),
                param: params::DATA_VALUE.into(),
            },
            lock: LockHint::None,
        });
        assert!(render(Dialect::PostgreSql, &op).is_err());
    }

    fn marker_count(dialect: Dialect, sql: &str) -> usize {
        match dialect {
            Dialect::MySql | Dialect::Sqlite => sql.matches('?').count(),
            Dialect::PostgreSql => sql.matches('$').count(),
            Dialect::MsSqlServer => sql.matches('@').count(),
            Dialect::Oracle => sql.matches(':').count(),
        }
    }

    proptest! {
        #[test]
        fn positional_plans_match_marker_count(names in proptest::collection::vec("[a-z]{1,3}", 1..6)) {
            let op = Operation::Insert(Insert {
                table: "T".into(),
                values: names.iter().map(|n| (Column::Correlation(n.clone()), n.clone())).collect(),
            });
            for dialect in [Dialect::MySql, Dialect::Sqlite] {
                let stmt = render(dialect, &op).unwrap();
                prop_assert_eq!(stmt.bindings.len(), marker_count(dialect, &stmt.sql));
                prop_assert_eq!(&stmt.bindings, &names);
            }
        }

        #[test]
        fn named_plans_bind_each_name_once(names in proptest::collection::vec("[a-z]{1,3}", 1..6)) {
            let op = Operation::Delete(Delete {
                table: "T".into(),
                filter: Predicate::And(names.iter().map(|n| Predicate::Eq(Column::Id, n.clone())).collect()),
            });
            let mut distinct = names.clone();
            distinct.sort();
            distinct.dedup();
            for dialect in [Dialect::MsSqlServer, Dialect::PostgreSql, Dialect::Oracle] {
                let stmt = render(dialect, &op).unwrap();
                let mut bound = stmt.bindings.clone();
                bound.sort();
                prop_assert_eq!(bound, distinct.clone());
            }
            let positional = render(Dialect::Sqlite, &op).unwrap();
            prop_assert_eq!(positional.bindings.len(), marker_count(Dialect::Sqlite, &positional.sql));
        }
    }
}
