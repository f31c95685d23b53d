use std::time::Duration;

use async_trait::async_trait;
use tokio_postgres::{Config as PgConfig, NoTls};

use crate::config::ClientConfig;
use crate::dialect::Dialect;
use crate::driver::{Connection, Connector};
use crate::error::SqlClientError;

use super::connection::PostgresConnection;

/// Options for connecting to PostgreSQL.
#[derive(Debug, Clone)]
pub struct PostgresOptions {
    pub config: PgConfig,
    pub autocommit: bool,
    pub dialect: Dialect,
}

impl PostgresOptions {
    #[must_use]
    pub fn new(config: PgConfig) -> Self {
        Self {
            config,
            autocommit: true,
            dialect: Dialect::postgres(),
        }
    }

    #[must_use]
    pub fn with_autocommit(mut self, autocommit: bool) -> Self {
        self.autocommit = autocommit;
        self
    }

    #[must_use]
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }
}

/// Opens PostgreSQL connections without TLS.
#[derive(Debug, Clone)]
pub struct PostgresConnector {
    opts: PostgresOptions,
}

impl PostgresConnector {
    #[must_use]
    pub fn new(opts: PostgresOptions) -> Self {
        Self { opts }
    }

    /// Build from a client config; the port defaults to 5432.
    ///
    /// # Errors
    /// Returns `SqlClientError::ConfigError` if the config does not validate.
    pub fn from_config(config: &ClientConfig) -> Result<Self, SqlClientError> {
        config.validate()?;
        let mut pg = PgConfig::new();
        pg.host(config.host.as_deref().unwrap_or_default());
        pg.port(config.port.unwrap_or(5432));
        pg.user(config.user.as_deref().unwrap_or_default());
        if let Some(password) = &config.password {
            pg.password(password);
        }
        if let Some(database) = &config.database {
            pg.dbname(database);
        }
        pg.connect_timeout(Duration::from_secs(10));
        Ok(Self::new(
            PostgresOptions::new(pg)
                .with_autocommit(config.autocommit)
                .with_dialect(config.dialect()),
        ))
    }

    #[must_use]
    pub fn options(&self) -> &PostgresOptions {
        &self.opts
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, SqlClientError> {
        let (client, connection) = self.opts.config.connect(NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("postgres connection error: {}", e);
            }
        });
        let mut conn = PostgresConnection::new(client, self.opts.dialect.clone());
        if !self.opts.autocommit {
            conn.set_autocommit(false).await?;
        }
        tracing::debug!("postgres connected hosts={:?}", self.opts.config.get_hosts());
        Ok(Box::new(conn))
    }

    fn dialect(&self) -> Dialect {
        self.opts.dialect.clone()
    }

    fn is_connectivity_error(&self, err: &SqlClientError) -> bool {
        super::is_connectivity_error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DatabaseType;

    #[test]
    fn builds_from_client_config() -> Result<(), Box<dyn std::error::Error>> {
        let cfg = ClientConfig::new(DatabaseType::Postgres)
            .with_host("db.internal:6432")
            .with_user("worker")
            .with_database("jobs");
        let connector = PostgresConnector::from_config(&cfg)?;
        let pg = &connector.options().config;
        assert_eq!(pg.get_ports(), &[6432]);
        assert_eq!(pg.get_user(), Some("worker"));
        assert_eq!(pg.get_dbname(), Some("jobs"));
        assert_eq!(connector.dialect().numeric_prefix, "$");
        Ok(())
    }

    #[test]
    fn missing_host_is_a_config_error() {
        let cfg = ClientConfig::new(DatabaseType::Postgres).with_user("worker");
        assert!(matches!(
            PostgresConnector::from_config(&cfg),
            Err(SqlClientError::ConfigError(_))
        ));
    }
}
