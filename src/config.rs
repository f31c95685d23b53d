//! Client configuration: connection settings plus the query defaults every call falls back to.

use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;
use crate::error::SqlClientError;
use crate::retry::RetryPolicy;
use crate::translation::ParamStyle;
use crate::types::DatabaseType;

/// Settings for one [`crate::SqlClient`].
///
/// ```rust
/// use sql_client::config::ClientConfig;
/// use sql_client::types::DatabaseType;
///
/// let cfg = ClientConfig::new(DatabaseType::Postgres)
///     .with_host("db.internal:6432")
///     .with_database("jobs");
/// assert_eq!(cfg.host.as_deref(), Some("db.internal"));
/// assert_eq!(cfg.port, Some(6432));
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub db_type: DatabaseType,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Database name; the file path for `SQLite`.
    pub database: Option<String>,
    /// Default table for `save_data` and the task helpers.
    pub table: Option<String>,
    pub autocommit: bool,
    /// Bind style sent to the driver; defaults to the dialect's.
    pub paramstyle: Option<ParamStyle>,
    pub statement_save_data: Option<String>,
    /// Quote auto-formatted column names with `escape_formatter`.
    pub escape_auto_format: bool,
    pub escape_formatter: Option<String>,
    pub empty_string_to_none: bool,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            db_type: DatabaseType::Sqlite,
            host: None,
            port: None,
            user: None,
            password: None,
            database: None,
            table: None,
            autocommit: true,
            paramstyle: None,
            statement_save_data: None,
            escape_auto_format: false,
            escape_formatter: None,
            empty_string_to_none: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn new(db_type: DatabaseType) -> Self {
        Self {
            db_type,
            ..Self::default()
        }
    }

    /// Read connection settings from `DB_HOST`, `DB_PORT`, `DB_USER`, `DB_PASSWORD`,
    /// `DB_DATABASE`, `DB_TABLE` and `DB_TYPE`.
    ///
    /// `DB_HOST` may carry the port as `host:port` when `DB_PORT` is unset.
    ///
    /// # Errors
    /// Returns `SqlClientError::ConfigError` if `DB_PORT` is not a port number or `DB_TYPE` is
    /// not a known database.
    pub fn from_env() -> Result<Self, SqlClientError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SqlClientError> {
        let db_type = match lookup("DB_TYPE") {
            Some(raw) => <DatabaseType as clap::ValueEnum>::from_str(&raw, true)
                .map_err(|e| SqlClientError::ConfigError(format!("DB_TYPE: {e}")))?,
            None => DatabaseType::default(),
        };
        let mut cfg = Self::new(db_type);
        cfg.user = lookup("DB_USER");
        cfg.password = lookup("DB_PASSWORD");
        cfg.database = lookup("DB_DATABASE");
        cfg.table = lookup("DB_TABLE");
        if let Some(port) = lookup("DB_PORT") {
            cfg.port = Some(parse_port(&port)?);
        }
        if let Some(host) = lookup("DB_HOST") {
            cfg = cfg.with_host(host);
        }
        Ok(cfg)
    }

    /// Set the host; a `host:port` value also sets the port unless one is already set.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        let host = host.into();
        match host.rsplit_once(':') {
            Some((name, port)) if self.port.is_none() => match parse_port(port) {
                Ok(port) => {
                    self.host = Some(name.to_string());
                    self.port = Some(port);
                }
                Err(_) => self.host = Some(host),
            },
            _ => self.host = Some(host),
        }
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    #[must_use]
    pub fn with_autocommit(mut self, autocommit: bool) -> Self {
        self.autocommit = autocommit;
        self
    }

    #[must_use]
    pub fn with_paramstyle(mut self, paramstyle: ParamStyle) -> Self {
        self.paramstyle = Some(paramstyle);
        self
    }

    #[must_use]
    pub fn with_statement_save_data(mut self, statement: impl Into<String>) -> Self {
        self.statement_save_data = Some(statement.into());
        self
    }

    #[must_use]
    pub fn with_escape_auto_format(mut self, escape_auto_format: bool) -> Self {
        self.escape_auto_format = escape_auto_format;
        self
    }

    #[must_use]
    pub fn with_escape_formatter(mut self, escape_formatter: impl Into<String>) -> Self {
        self.escape_formatter = Some(escape_formatter.into());
        self
    }

    #[must_use]
    pub fn with_empty_string_to_none(mut self, empty_string_to_none: bool) -> Self {
        self.empty_string_to_none = empty_string_to_none;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The dialect preset for `db_type` with this config's overrides applied.
    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.apply_overrides(Dialect::for_type(self.db_type))
    }

    /// `dialect` with this config's paramstyle, escape formatter and save statement applied.
    #[must_use]
    pub fn apply_overrides(&self, mut dialect: Dialect) -> Dialect {
        if let Some(style) = self.paramstyle {
            dialect = dialect.with_paramstyle(style);
        }
        if let Some(formatter) = &self.escape_formatter {
            dialect = dialect.with_escape_formatter(formatter.clone());
        }
        if let Some(statement) = &self.statement_save_data {
            dialect = dialect.with_statement_save_data(statement.clone());
        }
        dialect
    }

    /// Check that the settings needed to connect are present.
    ///
    /// # Errors
    /// Returns `SqlClientError::ConfigError` naming the first missing setting.
    pub fn validate(&self) -> Result<(), SqlClientError> {
        let missing = |what: &str| {
            Err(SqlClientError::ConfigError(format!(
                "{what} is required for {:?}",
                self.db_type
            )))
        };
        match self.db_type {
            DatabaseType::Sqlite => {
                if self.database.as_deref().is_none_or(str::is_empty) {
                    return missing("database path");
                }
            }
            _ => {
                if self.host.as_deref().is_none_or(str::is_empty) {
                    return missing("host");
                }
                if self.user.is_none() {
                    return missing("user");
                }
            }
        }
        if let Some(formatter) = &self.escape_formatter
            && !formatter.contains("{}")
        {
            return Err(SqlClientError::ConfigError(format!(
                "escape_formatter `{formatter}` has no `{{}}` slot"
            )));
        }
        Ok(())
    }
}

fn parse_port(raw: &str) -> Result<u16, SqlClientError> {
    raw.trim()
        .parse()
        .map_err(|e| SqlClientError::ConfigError(format!("invalid port `{raw}`: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn env_host_may_carry_the_port() {
        let cfg = ClientConfig::from_lookup(env(&[
            ("DB_TYPE", "postgres"),
            ("DB_HOST", "pg.local:6543"),
            ("DB_USER", "app"),
            ("DB_TABLE", "jobs"),
        ]))
        .unwrap();
        assert_eq!(cfg.db_type, DatabaseType::Postgres);
        assert_eq!(cfg.host.as_deref(), Some("pg.local"));
        assert_eq!(cfg.port, Some(6543));
        assert_eq!(cfg.table.as_deref(), Some("jobs"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn explicit_port_wins_over_host_suffix() {
        let cfg = ClientConfig::from_lookup(env(&[
            ("DB_HOST", "pg.local:6543"),
            ("DB_PORT", "5432"),
        ]))
        .unwrap();
        assert_eq!(cfg.host.as_deref(), Some("pg.local:6543"));
        assert_eq!(cfg.port, Some(5432));
    }

    #[test]
    fn bad_env_values_are_config_errors() {
        assert!(matches!(
            ClientConfig::from_lookup(env(&[("DB_PORT", "many")])),
            Err(SqlClientError::ConfigError(_))
        ));
        assert!(matches!(
            ClientConfig::from_lookup(env(&[("DB_TYPE", "db2")])),
            Err(SqlClientError::ConfigError(_))
        ));
    }

    #[test]
    fn validate_names_missing_settings() {
        let err = ClientConfig::new(DatabaseType::Mssql).validate().unwrap_err();
        assert!(err.to_string().contains("host"));
        let err = ClientConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("database path"));
        let err = ClientConfig::default()
            .with_database("x.db")
            .with_escape_formatter("[]")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("escape_formatter"));
    }

    #[test]
    fn overrides_flow_into_the_dialect() {
        let dialect = ClientConfig::new(DatabaseType::Mysql)
            .with_paramstyle(ParamStyle::PyFormat)
            .with_statement_save_data("REPLACE INTO")
            .dialect();
        assert_eq!(dialect.paramstyle, ParamStyle::PyFormat);
        assert_eq!(dialect.statement_save_data, "REPLACE INTO");
        assert_eq!(dialect.quote_identifier("a"), "`a`");
    }

    #[test]
    fn round_trips_through_json() {
        let cfg = ClientConfig::new(DatabaseType::Oracle).with_host("ora");
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ClientConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}
