use sagastore_core::CorrelationType;

use super::{MarkerStyle, SqlDialect};
use crate::ast::{ColumnType, LockHint, TableSpec};

/// Microsoft SQL Server (2016+ for JSON lookups).
#[derive(Debug, Default, Clone, Copy)]
pub struct MsSqlServer;

impl SqlDialect for MsSqlServer {
    fn name(&self) -> &'static str {
        "MsSqlServer"
    }

    fn quote(&self, ident: &str) -> String {
        format!("[{ident}]")
    }

    fn marker_style(&self) -> MarkerStyle {
        MarkerStyle::Named('@')
    }

    fn max_identifier_len(&self) -> Option<usize> {
        Some(128)
    }

    fn column_type(&self, ty: ColumnType) -> &'static str {
        match ty {
            ColumnType::Id => "uniqueidentifier",
            ColumnType::Document => "nvarchar(max)",
            ColumnType::Version => "varchar(23)",
            ColumnType::Token => "bigint",
            ColumnType::Correlation(CorrelationType::String) => "nvarchar(200)",
            ColumnType::Correlation(CorrelationType::Int) => "bigint",
            ColumnType::Correlation(CorrelationType::Guid) => "uniqueidentifier",
        }
    }

    fn table_lock_hint(&self, lock: LockHint) -> Option<&'static str> {
        match lock {
            LockHint::ForUpdate => Some("with (updlock, rowlock)"),
            LockHint::None => None,
        }
    }

    fn trailing_lock_clause(&self, _lock: LockHint) -> Option<&'static str> {
        None
    }

    fn json_path(&self, data_column: &str, path: &[&str]) -> String {
        format!("json_value({data_column}, '$.{}')", path.join("."))
    }

    fn create_table(&self, table: &TableSpec, columns: &[String]) -> String {
        let name = self.quote(&table.name);
        let mut script = format!(
            "if not exists (\n    select * from sys.objects\n    where object_id = object_id(N'{name}') and type in (N'U')\n)\nbegin\n    create table {name} (\n        {}\n    )\nend;\n",
            columns.join(",\n        ")
        );
        if let (Some(index), Some(correlation)) = (table.correlation_index(), &table.correlation) {
            let column = self.quote(&correlation.column().name());
            script.push_str(&format!(
                "if not exists (\n    select * from sys.indexes\n    where name = N'{index}' and object_id = object_id(N'{name}')\n)\nbegin\n    create unique index {} on {name} ({column}) where {column} is not null\nend;\n",
                self.quote(&index)
            ));
        }
        script
    }

    fn drop_table(&self, table: &TableSpec) -> String {
        let name = self.quote(&table.name);
        format!("if object_id(N'{name}', N'U') is not null\n    drop table {name};\n")
    }
}
