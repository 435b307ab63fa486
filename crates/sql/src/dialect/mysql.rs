use sagastore_core::CorrelationType;

use super::{MarkerStyle, SqlDialect};
use crate::ast::{ColumnType, TableSpec};

/// MySQL 5.7+ (native `json` type).
///
/// MySQL has no `create index if not exists`, so the unique correlation key is
/// declared inline with the table.
#[derive(Debug, Default, Clone, Copy)]
pub struct MySql;

impl SqlDialect for MySql {
    fn name(&self) -> &'static str {
        "MySql"
    }

    fn quote(&self, ident: &str) -> String {
        format!("`{ident}`")
    }

    fn marker_style(&self) -> MarkerStyle {
        MarkerStyle::Positional
    }

    fn max_identifier_len(&self) -> Option<usize> {
        Some(64)
    }

    fn column_type(&self, ty: ColumnType) -> &'static str {
        match ty {
            ColumnType::Id => "varchar(38)",
            ColumnType::Document => "json",
            ColumnType::Version => "varchar(23)",
            ColumnType::Token => "bigint",
            ColumnType::Correlation(CorrelationType::String) => "varchar(200)",
            ColumnType::Correlation(CorrelationType::Int) => "bigint",
            ColumnType::Correlation(CorrelationType::Guid) => "varchar(38)",
        }
    }

    fn json_path(&self, data_column: &str, path: &[&str]) -> String {
        format!("json_unquote(json_extract({data_column}, '$.{}'))", path.join("."))
    }

    fn create_table(&self, table: &TableSpec, columns: &[String]) -> String {
        let mut definitions = columns.to_vec();
        if let (Some(index), Some(correlation)) = (table.correlation_index(), &table.correlation) {
            definitions.push(format!(
                "unique key {} ({})",
                self.quote(&index),
                self.quote(&correlation.column().name())
            ));
        }
        format!(
            "create table if not exists {} (\n    {}\n) default charset=utf8mb4;\n",
            self.quote(&table.name),
            definitions.join(",\n    ")
        )
    }

    fn drop_table(&self, table: &TableSpec) -> String {
        format!("drop table if exists {};\n", self.quote(&table.name))
    }
}
