use async_trait::async_trait;
use tiberius::{AuthMethod, Client, Config as TiberiusConfig, SqlBrowser};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::config::ClientConfig;
use crate::dialect::Dialect;
use crate::driver::{Connection, Connector};
use crate::error::SqlClientError;

use super::connection::MssqlConnection;

/// Type alias for SQL Server client
pub type MssqlClient = Client<Compat<TcpStream>>;

/// Options for connecting to SQL Server.
#[derive(Debug, Clone)]
pub struct MssqlOptions {
    pub server: String,
    pub database: Option<String>,
    pub user: String,
    pub password: String,
    pub port: Option<u16>,
    /// Named instance, resolved through the SQL Browser service.
    pub instance_name: Option<String>,
    pub autocommit: bool,
    pub dialect: Dialect,
}

impl MssqlOptions {
    #[must_use]
    pub fn new(server: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            database: None,
            user: user.into(),
            password: password.into(),
            port: None,
            instance_name: None,
            autocommit: true,
            dialect: Dialect::mssql(),
        }
    }

    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_instance_name(mut self, instance_name: Option<String>) -> Self {
        self.instance_name = instance_name;
        self
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

    fn tiberius_config(&self) -> TiberiusConfig {
        let mut config = TiberiusConfig::new();
        config.host(&self.server);
        if let Some(database) = &self.database {
            config.database(database);
        }
        config.port(self.port.unwrap_or(1433));
        config.authentication(AuthMethod::sql_server(&self.user, &self.password));
        if let Some(instance) = &self.instance_name {
            config.instance_name(instance);
        }
        config.trust_cert();
        config
    }
}

/// Opens SQL Server connections over TCP.
#[derive(Debug, Clone)]
pub struct MssqlConnector {
    opts: MssqlOptions,
}

impl MssqlConnector {
    #[must_use]
    pub fn new(opts: MssqlOptions) -> Self {
        Self { opts }
    }

    /// Build from a client config.
    ///
    /// # Errors
    /// Returns `SqlClientError::ConfigError` if the config does not validate.
    pub fn from_config(config: &ClientConfig) -> Result<Self, SqlClientError> {
        config.validate()?;
        let mut opts = MssqlOptions::new(
            config.host.clone().unwrap_or_default(),
            config.user.clone().unwrap_or_default(),
            config.password.clone().unwrap_or_default(),
        )
        .with_port(config.port)
        .with_autocommit(config.autocommit)
        .with_dialect(config.dialect());
        if let Some(database) = &config.database {
            opts = opts.with_database(database.clone());
        }
        Ok(Self::new(opts))
    }

    #[must_use]
    pub fn options(&self) -> &MssqlOptions {
        &self.opts
    }
}

#[async_trait]
impl Connector for MssqlConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, SqlClientError> {
        let config = self.opts.tiberius_config();
        let tcp = if self.opts.instance_name.is_some() {
            TcpStream::connect_named(&config).await?
        } else {
            TcpStream::connect(config.get_addr()).await.map_err(|e| {
                SqlClientError::ConnectionError(format!("TCP connection error: {e}"))
            })?
        };
        tcp.set_nodelay(true).map_err(|e| {
            SqlClientError::ConnectionError(format!("TCP configuration error: {e}"))
        })?;
        let client = Client::connect(config, tcp.compat_write()).await?;

        let mut conn = MssqlConnection::new(client, self.opts.dialect.clone());
        if !self.opts.autocommit {
            conn.set_autocommit(false).await?;
        }
        tracing::debug!("mssql connected server={}", self.opts.server);
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
        let cfg = ClientConfig::new(DatabaseType::Mssql)
            .with_host("sql.internal")
            .with_user("sa")
            .with_password("secret")
            .with_database("jobs");
        let connector = MssqlConnector::from_config(&cfg)?;
        assert_eq!(connector.options().server, "sql.internal");
        assert_eq!(connector.options().database.as_deref(), Some("jobs"));
        assert_eq!(
            connector.options().tiberius_config().get_addr(),
            "sql.internal:1433"
        );
        assert_eq!(connector.dialect().statement_save_data, "INSERT");
        Ok(())
    }
}
