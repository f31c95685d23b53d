use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::ClientConfig;
use crate::dialect::Dialect;
use crate::driver::{Connection, Connector};
use crate::error::SqlClientError;

use super::connection::SqliteConnection;

pub type SharedSqliteConnection = Arc<Mutex<rusqlite::Connection>>;

/// Options for opening a `SQLite` database.
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    pub db_path: String,
    /// How long a statement waits on a locked database before failing with `SQLITE_BUSY`.
    pub busy_timeout: Duration,
    pub wal: bool,
    pub autocommit: bool,
    pub dialect: Dialect,
}

impl SqliteOptions {
    #[must_use]
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            busy_timeout: Duration::from_secs(5),
            wal: true,
            autocommit: true,
            dialect: Dialect::sqlite(),
        }
    }

    #[must_use]
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    #[must_use]
    pub fn with_wal(mut self, wal: bool) -> Self {
        self.wal = wal;
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
}

/// Opens `SQLite` connections.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    opts: SqliteOptions,
}

impl SqliteConnector {
    #[must_use]
    pub fn new(opts: SqliteOptions) -> Self {
        Self { opts }
    }

    /// Build from a client config; the database path is `config.database`.
    ///
    /// # Errors
    /// Returns `SqlClientError::ConfigError` if the config does not validate.
    pub fn from_config(config: &ClientConfig) -> Result<Self, SqlClientError> {
        config.validate()?;
        let database = config.database.clone().unwrap_or_default();
        Ok(Self::new(
            SqliteOptions::new(database)
                .with_autocommit(config.autocommit)
                .with_dialect(config.dialect()),
        ))
    }

    #[must_use]
    pub fn options(&self) -> &SqliteOptions {
        &self.opts
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, SqlClientError> {
        let path = self.opts.db_path.clone();
        let busy_timeout = self.opts.busy_timeout;
        let wal = self.opts.wal && path != ":memory:" && !path.is_empty();
        let conn = tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&path)?;
            conn.busy_timeout(busy_timeout)?;
            if wal {
                conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            }
            Ok::<_, SqlClientError>(conn)
        })
        .await
        .map_err(|e| {
            SqlClientError::ConnectionError(format!("sqlite spawn_blocking join error: {e}"))
        })??;

        let mut conn = SqliteConnection::new(
            Arc::new(Mutex::new(conn)),
            self.opts.dialect.clone(),
        );
        if !self.opts.autocommit {
            conn.set_autocommit(false).await?;
        }
        tracing::debug!("sqlite connected path={}", self.opts.db_path);
        Ok(Box::new(conn))
    }

    fn dialect(&self) -> Dialect {
        self.opts.dialect.clone()
    }

    fn is_connectivity_error(&self, err: &SqlClientError) -> bool {
        super::is_connectivity_error(err)
    }
}
