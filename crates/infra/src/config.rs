//! Persistence configuration.

use serde::{Deserialize, Serialize};

use sagastore_core::{ConfigError, ConfigResult};
use sagastore_sql::{Dialect, ScriptGenerator};

pub const ENV_DIALECT: &str = "SAGASTORE_DIALECT";
pub const ENV_TABLE_PREFIX: &str = "SAGASTORE_TABLE_PREFIX";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    pub dialect: Dialect,
    /// Prepended to every saga table name, usually the endpoint name plus `_`.
    #[serde(default)]
    pub table_prefix: String,
    #[serde(default)]
    pub database_url: Option<String>,
}

impl PersistenceConfig {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            table_prefix: String::new(),
            database_url: None,
        }
    }

    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Read configuration from the process environment.
    ///
    /// `SAGASTORE_DIALECT` defaults to PostgreSQL; the prefix defaults to empty.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let dialect = match lookup(ENV_DIALECT) {
            Some(raw) => raw.parse()?,
            None => Dialect::PostgreSql,
        };
        let config = Self {
            dialect,
            table_prefix: lookup(ENV_TABLE_PREFIX).unwrap_or_default(),
            database_url: lookup(ENV_DATABASE_URL).filter(|url| !url.is_empty()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let valid = self
            .table_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(ConfigError::invalid(format!(
                "table prefix '{}' may only contain letters, digits and '_'",
                self.table_prefix
            )));
        }
        Ok(())
    }

    pub fn generator(&self) -> ScriptGenerator {
        ScriptGenerator::new(self.dialect, self.table_prefix.clone())
    }
}
