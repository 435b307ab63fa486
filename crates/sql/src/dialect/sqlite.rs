use sagastore_core::CorrelationType;

use super::{MarkerStyle, SqlDialect};
use crate::ast::{ColumnType, LockHint, TableSpec};
use crate::value::SqlValue;

/// SQLite 3.38+ (JSON functions built in).
///
/// SQLite locks the whole database for writes, so there is no row lock clause.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sqlite;

impl SqlDialect for Sqlite {
    fn name(&self) -> &'static str {
        "Sqlite"
    }

    fn quote(&self, ident: &str) -> String {
        format!("\"{ident}\"")
    }

    fn marker_style(&self) -> MarkerStyle {
        MarkerStyle::Positional
    }

    fn column_type(&self, ty: ColumnType) -> &'static str {
        match ty {
            ColumnType::Id => "text",
            ColumnType::Document => "text",
            ColumnType::Version => "text",
            ColumnType::Token => "integer",
            ColumnType::Correlation(CorrelationType::Int) => "integer",
            ColumnType::Correlation(_) => "text",
        }
    }

    fn trailing_lock_clause(&self, _lock: LockHint) -> Option<&'static str> {
        None
    }

    fn json_path(&self, data_column: &str, path: &[&str]) -> String {
        format!("json_extract({data_column}, '$.{}')", path.join("."))
    }

    // json_extract returns native SQL types, so integers stay integers.
    fn json_comparison_value(&self, value: SqlValue) -> SqlValue {
        match value {
            SqlValue::Int(i) => SqlValue::Int(i),
            other => other.into_text(),
        }
    }

    fn create_table(&self, table: &TableSpec, columns: &[String]) -> String {
        let name = self.quote(&table.name);
        let mut script = format!(
            "create table if not exists {name} (\n    {}\n);\n",
            columns.join(",\n    ")
        );
        if let (Some(index), Some(correlation)) = (table.correlation_index(), &table.correlation) {
            script.push_str(&format!(
                "create unique index if not exists {} on {name} ({});\n",
                self.quote(&index),
                self.quote(&correlation.column().name())
            ));
        }
        script
    }

    fn drop_table(&self, table: &TableSpec) -> String {
        format!("drop table if exists {};\n", self.quote(&table.name))
    }
}
