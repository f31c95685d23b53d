//! The client: one connection, the query pipeline on top of it, and transaction scopes.

mod query;
mod save;
mod transaction;

pub use query::{BatchMode, QueryBuilder, QueryOptions};
pub use save::SaveOptions;
pub use transaction::{Transaction, TxScope};

use std::path::Path;

use async_trait::async_trait;

use crate::args::{Argument, NormalizeOptions, Record, normalize};
use crate::config::ClientConfig;
use crate::dialect::Dialect;
use crate::driver::{Connection, Connector};
use crate::error::SqlClientError;
use crate::results::ResultSet;
use crate::retry::{Lifecycle, RetryExecutor, RetryPolicy};
use crate::sql_builder::Sql;

use query::{Prepared, prepare};

/// A database client over one connection.
///
/// Every statement runs through the same pipeline: arguments are normalized, the SQL is rewritten
/// into the driver's bind style, and the call is retried on connectivity errors according to the
/// configured [`RetryPolicy`].
///
/// ```rust,no_run
/// use sql_client::prelude::*;
///
/// # async fn demo() -> Result<(), SqlClientError> {
/// let config = ClientConfig::new(DatabaseType::Sqlite).with_database("jobs.db");
/// let mut client = SqlClient::new(SqliteConnector::from_config(&config)?, config);
/// client.connect().await?;
/// let n = client.save_data((1, "first"), Some("jobs"), SaveOptions::default()).await?;
/// assert_eq!(n, 1);
/// # Ok(())
/// # }
/// ```
pub struct SqlClient<C: Connector> {
    connector: C,
    conn: Option<Box<dyn Connection>>,
    config: ClientConfig,
    dialect: Dialect,
    autocommit: bool,
    tx_open: bool,
    /// A statement failed inside the open scope; its work is gone and only rollback remains.
    tx_aborted: bool,
    /// Left behind by a dropped [`Transaction`]; rolled back before the next operation.
    pending_rollback: Option<TxScope>,
}

impl<C: Connector> SqlClient<C> {
    /// Build a client; no connection is opened until the first statement or [`Self::connect`].
    #[must_use]
    pub fn new(connector: C, config: ClientConfig) -> Self {
        let dialect = config.apply_overrides(connector.dialect());
        Self {
            connector,
            conn: None,
            autocommit: config.autocommit,
            config,
            dialect,
            tx_open: false,
            tx_aborted: false,
            pending_rollback: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    #[must_use]
    pub fn connector(&self) -> &C {
        &self.connector
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    #[must_use]
    pub fn autocommit(&self) -> bool {
        self.autocommit
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.tx_open
    }

    /// Open the connection, retrying connectivity failures under the client's policy.
    ///
    /// Returns whether a connection is open afterwards.
    ///
    /// # Errors
    /// Returns the last error when the policy raises; configuration errors always.
    pub async fn connect(&mut self) -> Result<bool, SqlClientError> {
        let policy = self.config.retry;
        let mut call = ConnectCall { client: self };
        RetryExecutor::new(policy).run(&mut call).await
    }

    /// Check the connection, reconnecting once on a connectivity error.
    ///
    /// # Errors
    /// Returns the ping error when it is not a connectivity error, or when the reconnect fails.
    pub async fn ping(&mut self) -> Result<(), SqlClientError> {
        self.settle().await;
        let result = self.ensure_connection().await?.ping().await;
        match result {
            Ok(()) => Ok(()),
            Err(err) if self.is_connectivity_error(&err) && self.config.retry.try_reconnect => {
                tracing::warn!("ping failed, reconnecting: {}", err);
                if self.tx_open {
                    self.tx_aborted = true;
                }
                self.reconnect().await?;
                self.ensure_connection().await?.ping().await
            }
            Err(err) => Err(err),
        }
    }

    /// Close the connection; the next statement opens a new one.
    ///
    /// # Errors
    /// Returns the driver error from closing.
    pub async fn close(&mut self) -> Result<(), SqlClientError> {
        self.pending_rollback = None;
        self.tx_open = false;
        self.tx_aborted = false;
        match self.conn.take() {
            Some(mut conn) => conn.close().await,
            None => Ok(()),
        }
    }

    /// Switch autocommit; turning it on commits an open implicit transaction.
    ///
    /// # Errors
    /// Returns `SqlClientError::TransactionError` inside a transaction scope, or the driver error.
    pub async fn set_autocommit(&mut self, autocommit: bool) -> Result<(), SqlClientError> {
        self.settle().await;
        if self.tx_open {
            return Err(SqlClientError::TransactionError(
                "autocommit cannot change inside a transaction scope".into(),
            ));
        }
        if let Some(conn) = self.conn.as_mut() {
            conn.set_autocommit(autocommit).await?;
        }
        self.autocommit = autocommit;
        Ok(())
    }

    /// Start a statement.
    pub fn query(&mut self, sql: impl Into<Sql>) -> QueryBuilder<'_, C> {
        QueryBuilder::new(self, sql.into())
    }

    /// Start a statement whose text is read from `path`.
    ///
    /// # Errors
    /// Returns `SqlClientError::ConfigError` when the file cannot be read.
    pub async fn query_file(
        &mut self,
        path: impl AsRef<Path>,
    ) -> Result<QueryBuilder<'_, C>, SqlClientError> {
        let path = path.as_ref();
        let sql = tokio::fs::read_to_string(path).await.map_err(|e| {
            SqlClientError::ConfigError(format!("cannot read {}: {e}", path.display()))
        })?;
        Ok(self.query(sql))
    }

    /// Start a call of stored procedure `name` with positional `args`.
    ///
    /// The statement follows the dialect (`EXEC`, `CALL`, `SELECT * FROM`, `BEGIN ... END;`);
    /// finish it with [`QueryBuilder::select`] for procedures that return rows, or
    /// [`QueryBuilder::execute`].
    ///
    /// # Errors
    /// Returns `SqlClientError::Unimplemented` when the database has no stored procedures and
    /// `SqlClientError::ParameterError` for mapping arguments.
    pub fn call_proc(
        &mut self,
        name: &str,
        args: impl Into<Argument>,
    ) -> Result<QueryBuilder<'_, C>, SqlClientError> {
        let args = args.into();
        let arity = match normalize(Some(args.clone()), &NormalizeOptions::default())?.first() {
            Some(Record::Named(_)) => {
                return Err(SqlClientError::ParameterError(format!(
                    "procedure {name} takes positional arguments"
                )));
            }
            Some(record) => record.len(),
            None => 0,
        };
        let sql = self.dialect.call_statement(name, arity).ok_or_else(|| {
            SqlClientError::Unimplemented(format!(
                "stored procedures on {:?}",
                self.dialect.db_type
            ))
        })?;
        let builder = self.query(sql);
        Ok(if arity == 0 { builder } else { builder.args(args) })
    }

    /// Render `sql` with the first record of `args` inlined as literals, the way failing
    /// statements are logged.
    ///
    /// # Errors
    /// Returns normalization errors for `args`.
    pub fn format_sql(
        &self,
        sql: impl Into<Sql>,
        args: Option<Argument>,
    ) -> Result<String, SqlClientError> {
        let prepared = prepare(
            &self.dialect,
            &self.config,
            &sql.into(),
            args,
            &QueryOptions::default(),
        )?;
        Ok(prepared.render_literal(prepared.batch.first()))
    }

    pub(crate) async fn ensure_connection(
        &mut self,
    ) -> Result<&mut Box<dyn Connection>, SqlClientError> {
        if self.conn.is_none() {
            let mut conn = self.connector.connect().await?;
            if conn.autocommit() != self.autocommit {
                conn.set_autocommit(self.autocommit).await?;
            }
            tracing::info!("connected db_type={:?}", self.dialect.db_type);
            self.conn = Some(conn);
        }
        self.conn
            .as_mut()
            .ok_or_else(|| SqlClientError::ConnectionError("no connection".into()))
    }

    pub(crate) async fn reconnect(&mut self) -> Result<(), SqlClientError> {
        if let Some(mut stale) = self.conn.take()
            && let Err(err) = stale.close().await
        {
            tracing::debug!("closing stale connection failed: {}", err);
        }
        tracing::info!("reconnecting db_type={:?}", self.dialect.db_type);
        self.ensure_connection().await?;
        Ok(())
    }

    pub(crate) async fn rollback_connection(&mut self) -> Result<(), SqlClientError> {
        match self.conn.as_mut() {
            Some(conn) => conn.rollback().await,
            None => Ok(()),
        }
    }

    pub(crate) fn is_connectivity_error(&self, err: &SqlClientError) -> bool {
        match self.conn.as_ref() {
            Some(conn) => conn.is_connectivity_error(err),
            None => self.connector.is_connectivity_error(err),
        }
    }

    /// Run the rollback a dropped [`Transaction`] left behind.
    pub(crate) async fn settle(&mut self) {
        if let Some(scope) = self.pending_rollback.take()
            && let Err(err) = self.rollback(scope).await
        {
            tracing::error!("rollback of dropped transaction failed: {}", err);
        }
    }

    pub(crate) async fn run_count(
        &mut self,
        prepared: &Prepared,
        op: Op<'_>,
        commit: bool,
        policy: RetryPolicy,
    ) -> Result<usize, SqlClientError> {
        match self.run(prepared, op, commit, policy).await? {
            Output::Count(n) => Ok(n),
            Output::Rows(rows) => Ok(rows.len()),
        }
    }

    pub(crate) async fn run_rows(
        &mut self,
        prepared: &Prepared,
        op: Op<'_>,
        commit: bool,
        policy: RetryPolicy,
    ) -> Result<ResultSet, SqlClientError> {
        match self.run(prepared, op, commit, policy).await? {
            Output::Rows(rows) => Ok(rows),
            Output::Count(_) => Ok(ResultSet::default()),
        }
    }

    async fn run(
        &mut self,
        prepared: &Prepared,
        op: Op<'_>,
        commit: bool,
        policy: RetryPolicy,
    ) -> Result<Output, SqlClientError> {
        let mut call = StatementCall {
            client: self,
            prepared,
            op,
            commit,
        };
        RetryExecutor::new(policy).run(&mut call).await
    }
}

/// What one attempt sends to the connection.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Op<'p> {
    Execute(&'p Record),
    ExecuteMany(&'p [Record]),
    Fetch(&'p Record),
}

#[derive(Debug)]
pub(crate) enum Output {
    Count(usize),
    Rows(ResultSet),
}

impl Default for Output {
    fn default() -> Self {
        Output::Count(0)
    }
}

struct StatementCall<'c, 'p, C: Connector> {
    client: &'c mut SqlClient<C>,
    prepared: &'p Prepared,
    op: Op<'p>,
    commit: bool,
}

#[async_trait]
impl<'c, 'p, C: Connector> Lifecycle for StatementCall<'c, 'p, C> {
    type Output = Output;

    async fn attempt(&mut self) -> Result<Output, SqlClientError> {
        self.client.check_scope()?;
        let sql = self.prepared.sql.as_str();
        let op = self.op;
        // a transaction scope owns the commit
        let commit = self.commit && !self.client.tx_open;
        let conn = self.client.ensure_connection().await?;
        tracing::debug!("execute sql={}", sql);
        let output = match op {
            Op::Execute(record) => Output::Count(conn.execute(sql, record).await?),
            Op::ExecuteMany(batch) => Output::Count(conn.execute_many(sql, batch).await?),
            Op::Fetch(record) => Output::Rows(conn.fetch_all(sql, record).await?),
        };
        if commit && !conn.autocommit() {
            conn.commit().await?;
        }
        Ok(output)
    }

    async fn reconnect(&mut self) -> Result<(), SqlClientError> {
        if self.client.tx_open {
            // a new connection cannot carry the scope's earlier statements
            self.client.tx_aborted = true;
            return Err(SqlClientError::TransactionError(
                "connection lost inside a transaction scope".into(),
            ));
        }
        self.client.reconnect().await
    }

    async fn rollback(&mut self) -> Result<(), SqlClientError> {
        if self.client.tx_open {
            self.client.tx_aborted = true;
        }
        self.client.rollback_connection().await
    }

    fn is_connectivity_error(&self, err: &SqlClientError) -> bool {
        self.client.is_connectivity_error(err)
    }

    fn describe(&self) -> String {
        let record = match self.op {
            Op::Execute(record) | Op::Fetch(record) => Some(record),
            Op::ExecuteMany(batch) => batch.first(),
        };
        self.prepared.describe(record)
    }
}

struct ConnectCall<'c, C: Connector> {
    client: &'c mut SqlClient<C>,
}

#[async_trait]
impl<'c, C: Connector> Lifecycle for ConnectCall<'c, C> {
    type Output = bool;

    async fn attempt(&mut self) -> Result<bool, SqlClientError> {
        self.client.ensure_connection().await?;
        Ok(true)
    }

    async fn reconnect(&mut self) -> Result<(), SqlClientError> {
        self.client.conn = None;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), SqlClientError> {
        Ok(())
    }

    fn is_connectivity_error(&self, err: &SqlClientError) -> bool {
        self.client.connector.is_connectivity_error(err)
    }

    fn describe(&self) -> String {
        format!("connect {:?}", self.client.dialect.db_type)
    }
}
