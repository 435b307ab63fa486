use sagastore_core::CorrelationType;

use super::{MarkerStyle, SqlDialect};
use crate::ast::{ColumnType, TableSpec};

/// Oracle 12c+.
///
/// Identifiers are upper-cased and limited to 30 characters; DDL is wrapped in
/// PL/SQL blocks that check the data dictionary first.
#[derive(Debug, Default, Clone, Copy)]
pub struct Oracle;

impl SqlDialect for Oracle {
    fn name(&self) -> &'static str {
        "Oracle"
    }

    fn quote(&self, ident: &str) -> String {
        format!("\"{}\"", ident.to_ascii_uppercase())
    }

    fn marker_style(&self) -> MarkerStyle {
        MarkerStyle::Named(':')
    }

    fn max_identifier_len(&self) -> Option<usize> {
        Some(30)
    }

    fn column_type(&self, ty: ColumnType) -> &'static str {
        match ty {
            ColumnType::Id => "varchar2(38)",
            ColumnType::Document => "clob",
            ColumnType::Version => "varchar2(23)",
            ColumnType::Token => "number(19)",
            ColumnType::Correlation(CorrelationType::String) => "nvarchar2(200)",
            ColumnType::Correlation(CorrelationType::Int) => "number(19)",
            ColumnType::Correlation(CorrelationType::Guid) => "varchar2(38)",
        }
    }

    fn json_path(&self, data_column: &str, path: &[&str]) -> String {
        format!("json_value({data_column}, '$.{}')", path.join("."))
    }

    fn create_table(&self, table: &TableSpec, columns: &[String]) -> String {
        let upper = table.name.to_ascii_uppercase();
        let mut script = format!(
            "declare\n  n number(10);\nbegin\n  select count(*) into n from user_tables where table_name = '{upper}';\n  if (n = 0) then\n    execute immediate 'create table {} (\n      {}\n    )';\n  end if;\n",
            self.quote(&table.name),
            columns.join(",\n      ")
        );
        if let (Some(index), Some(correlation)) = (table.correlation_index(), &table.correlation) {
            script.push_str(&format!(
                "  select count(*) into n from user_indexes where index_name = '{}';\n  if (n = 0) then\n    execute immediate 'create unique index {} on {} ({})';\n  end if;\n",
                index.to_ascii_uppercase(),
                self.quote(&index),
                self.quote(&table.name),
                self.quote(&correlation.column().name())
            ));
        }
        script.push_str("end;\n");
        script
    }

    fn drop_table(&self, table: &TableSpec) -> String {
        format!(
            "declare\n  n number(10);\nbegin\n  select count(*) into n from user_tables where table_name = '{}';\n  if (n > 0) then\n    execute immediate 'drop table {}';\n  end if;\nend;\n",
            table.name.to_ascii_uppercase(),
            self.quote(&table.name)
        )
    }
}
