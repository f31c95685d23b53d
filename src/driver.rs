//! The seam between the client core and a concrete database driver.
//!
//! The core never names a driver type: it talks to a [`Connector`] that hands out boxed
//! [`Connection`]s. Each adapter (`sqlite`, `postgres`, `mssql`) implements both traits once,
//! including its own classification of connectivity errors.

use async_trait::async_trait;

use crate::args::Record;
use crate::dialect::Dialect;
use crate::error::SqlClientError;
use crate::results::ResultSet;

/// Parameters bound to one execution: positional values for `?`, `%s` and numeric markers, or a
/// mapping for `:name` and `%(name)s`.
pub type BoundParams = Record;

/// Opens connections for a [`crate::SqlClient`].
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new connection.
    ///
    /// # Errors
    /// Returns the driver error, or `SqlClientError::ConnectionError` when the server cannot be
    /// reached.
    async fn connect(&self) -> Result<Box<dyn Connection>, SqlClientError>;

    /// Conventions of the database this connector talks to.
    fn dialect(&self) -> Dialect;

    /// Classify errors raised while connecting; see [`Connection::is_connectivity_error`].
    fn is_connectivity_error(&self, err: &SqlClientError) -> bool {
        err.category().is_retriable()
    }
}

/// One live database connection.
///
/// With autocommit off, adapters open a transaction before the first statement and keep it open
/// until `commit` or `rollback`.
#[async_trait]
pub trait Connection: Send {
    fn dialect(&self) -> &Dialect;

    /// Run one statement; returns the affected row count, or the number of rows a query produced.
    async fn execute(&mut self, sql: &str, params: &BoundParams) -> Result<usize, SqlClientError>;

    /// Run one statement per record; returns the number of records executed.
    async fn execute_many(
        &mut self,
        sql: &str,
        batch: &[BoundParams],
    ) -> Result<usize, SqlClientError>;

    /// Run a query and collect every row.
    async fn fetch_all(
        &mut self,
        sql: &str,
        params: &BoundParams,
    ) -> Result<ResultSet, SqlClientError>;

    /// Open a transaction. Joining an already open transaction is not an error.
    async fn begin(&mut self) -> Result<(), SqlClientError>;

    /// Commit the open transaction; a no-op when none is open.
    async fn commit(&mut self) -> Result<(), SqlClientError>;

    /// Roll back the open transaction; a no-op when none is open.
    async fn rollback(&mut self) -> Result<(), SqlClientError>;

    fn in_transaction(&self) -> bool;

    async fn set_autocommit(&mut self, autocommit: bool) -> Result<(), SqlClientError>;

    fn autocommit(&self) -> bool;

    /// Cheap round trip to check the connection is alive.
    async fn ping(&mut self) -> Result<(), SqlClientError>;

    async fn close(&mut self) -> Result<(), SqlClientError>;

    /// Whether `err` means the connection or the server went away, as opposed to a failing
    /// statement.
    fn is_connectivity_error(&self, err: &SqlClientError) -> bool {
        err.category().is_retriable()
    }
}
