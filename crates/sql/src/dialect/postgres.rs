use sagastore_core::CorrelationType;

use super::{MarkerStyle, SqlDialect};
use crate::ast::{ColumnType, TableSpec};

/// PostgreSQL (9.5+ for `create index if not exists`).
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgreSql;

impl SqlDialect for PostgreSql {
    fn name(&self) -> &'static str {
        "PostgreSql"
    }

    fn quote(&self, ident: &str) -> String {
        format!("\"{ident}\"")
    }

    fn marker_style(&self) -> MarkerStyle {
        MarkerStyle::Numbered
    }

    fn max_identifier_len(&self) -> Option<usize> {
        Some(63)
    }

    fn column_type(&self, ty: ColumnType) -> &'static str {
        match ty {
            ColumnType::Id => "uuid",
            ColumnType::Document => "jsonb",
            ColumnType::Version => "varchar(23)",
            ColumnType::Token => "bigint",
            ColumnType::Correlation(CorrelationType::String) => "varchar(200)",
            ColumnType::Correlation(CorrelationType::Int) => "bigint",
            ColumnType::Correlation(CorrelationType::Guid) => "uuid",
        }
    }

    fn json_path(&self, data_column: &str, path: &[&str]) -> String {
        format!("{data_column} #>> '{{{}}}'", path.join(","))
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
