//! Dialect adapters: one backend implementation per supported SQL engine.
//!
//! The renderer is dialect-agnostic; everything that differs between engines
//! (identifier quoting, parameter markers, type names, lock placement, JSON
//! access, idempotent DDL) sits behind [`SqlDialect`].

mod mssql;
mod mysql;
mod oracle;
mod postgres;
mod sqlite;

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use sagastore_core::ConfigError;

use crate::ast::{ColumnType, LockHint, TableSpec};
use crate::value::SqlValue;

pub use mssql::MsSqlServer;
pub use mysql::MySql;
pub use oracle::Oracle;
pub use postgres::PostgreSql;
pub use sqlite::Sqlite;

/// How a dialect spells parameter markers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MarkerStyle {
    /// `@Id`, `:Id`; one binding per distinct name.
    Named(char),
    /// `$1`, `$2`; one binding per distinct name, reused on repetition.
    Numbered,
    /// `?`; one binding per occurrence.
    Positional,
}

/// Backend-specific SQL spelling.
pub trait SqlDialect: Send + Sync {
    fn name(&self) -> &'static str;

    /// Quote an identifier that has already been validated.
    fn quote(&self, ident: &str) -> String;

    fn marker_style(&self) -> MarkerStyle;

    /// Longest identifier the engine accepts, if limited.
    fn max_identifier_len(&self) -> Option<usize> {
        None
    }

    fn column_type(&self, ty: ColumnType) -> &'static str;

    /// Hint placed right after the table name in a `select` (`with (updlock)`).
    fn table_lock_hint(&self, _lock: LockHint) -> Option<&'static str> {
        None
    }

    /// Clause appended at the end of a `select` (`for update`).
    fn trailing_lock_clause(&self, lock: LockHint) -> Option<&'static str> {
        match lock {
            LockHint::ForUpdate => Some("for update"),
            LockHint::None => None,
        }
    }

    /// Expression extracting the scalar at `path` from the (quoted) data column.
    fn json_path(&self, data_column: &str, path: &[&str]) -> String;

    /// Value shape the JSON extraction expression compares against.
    fn json_comparison_value(&self, value: SqlValue) -> SqlValue {
        value.into_text()
    }

    /// Idempotent `create table` (and correlation index) script.
    fn create_table(&self, table: &TableSpec, columns: &[String]) -> String;

    /// Idempotent `drop table` script.
    fn drop_table(&self, table: &TableSpec) -> String;
}

/// Supported SQL dialects.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    MsSqlServer,
    PostgreSql,
    MySql,
    Sqlite,
    Oracle,
}

impl Dialect {
    pub const ALL: [Dialect; 5] = [
        Dialect::MsSqlServer,
        Dialect::PostgreSql,
        Dialect::MySql,
        Dialect::Sqlite,
        Dialect::Oracle,
    ];

    pub fn sql(self) -> &'static dyn SqlDialect {
        match self {
            Dialect::MsSqlServer => &MsSqlServer,
            Dialect::PostgreSql => &PostgreSql,
            Dialect::MySql => &MySql,
            Dialect::Sqlite => &Sqlite,
            Dialect::Oracle => &Oracle,
        }
    }

    /// Folder name used for published script artifacts.
    pub fn directory_name(self) -> &'static str {
        match self {
            Dialect::MsSqlServer => "MsSqlServer",
            Dialect::PostgreSql => "PostgreSql",
            Dialect::MySql => "MySql",
            Dialect::Sqlite => "Sqlite",
            Dialect::Oracle => "Oracle",
        }
    }

    /// Validate and quote an identifier.
    pub fn identifier(self, ident: &str) -> Result<String, ConfigError> {
        let d = self.sql();
        if let Some(max) = d.max_identifier_len() {
            if ident.len() > max {
                return Err(ConfigError::unsupported(
                    d.name(),
                    format!("identifier '{ident}' ({} chars, limit {max})", ident.len()),
                ));
            }
        }
        Ok(d.quote(ident))
    }
}

impl core::fmt::Display for Dialect {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.sql().name())
    }
}

impl FromStr for Dialect {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mssqlserver" | "mssql" | "sqlserver" => Ok(Dialect::MsSqlServer),
            "postgresql" | "postgres" | "pg" => Ok(Dialect::PostgreSql),
            "mysql" => Ok(Dialect::MySql),
            "sqlite" => Ok(Dialect::Sqlite),
            "oracle" => Ok(Dialect::Oracle),
            other => Err(ConfigError::invalid(format!("unknown dialect '{other}'"))),
        }
    }
}
