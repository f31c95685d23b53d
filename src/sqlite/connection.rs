use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::dialect::Dialect;
use crate::driver::{BoundParams, Connection};
use crate::error::SqlClientError;
use crate::results::ResultSet;

use super::config::SharedSqliteConnection;
use super::params::Params;
use super::query::{build_result_set, execute_statement};

/// A single `rusqlite` connection driven from async code.
///
/// Every call runs on the blocking pool; the connection sits behind a mutex so a call holds it
/// for its whole duration.
pub struct SqliteConnection {
    conn: Option<SharedSqliteConnection>,
    dialect: Dialect,
    autocommit: bool,
    in_transaction: bool,
}

impl SqliteConnection {
    pub(crate) fn new(conn: SharedSqliteConnection, dialect: Dialect) -> Self {
        Self {
            conn: Some(conn),
            dialect,
            autocommit: true,
            in_transaction: false,
        }
    }

    fn conn_handle(&self) -> Result<SharedSqliteConnection, SqlClientError> {
        self.conn
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| SqlClientError::ConnectionError("sqlite connection is closed".into()))
    }

    /// Run `func` against the raw connection on the blocking pool.
    ///
    /// # Errors
    /// Returns `SqlClientError::ConnectionError` when the connection is closed, or whatever
    /// `func` returns.
    pub async fn with_connection<F, R>(&self, func: F) -> Result<R, SqlClientError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R, SqlClientError> + Send + 'static,
        R: Send + 'static,
    {
        run_blocking(self.conn_handle()?, func).await
    }

    async fn batch(&self, sql: &'static str) -> Result<(), SqlClientError> {
        self.with_connection(move |guard| Ok(guard.execute_batch(sql)?))
            .await
    }

    /// With autocommit off, statements run inside an implicitly opened transaction.
    async fn ensure_implicit_tx(&mut self) -> Result<(), SqlClientError> {
        if !self.autocommit && !self.in_transaction {
            self.begin().await?;
        }
        Ok(())
    }
}

impl fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("open", &self.conn.is_some())
            .field("autocommit", &self.autocommit)
            .field("in_transaction", &self.in_transaction)
            .finish()
    }
}

pub(crate) async fn run_blocking<F, R>(
    conn: SharedSqliteConnection,
    func: F,
) -> Result<R, SqlClientError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, SqlClientError> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut guard = conn.blocking_lock();
        func(&mut guard)
    })
    .await
    .map_err(|e| SqlClientError::ExecutionError(format!("sqlite spawn_blocking join error: {e}")))?
}

#[async_trait]
impl Connection for SqliteConnection {
    fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    async fn execute(&mut self, sql: &str, params: &BoundParams) -> Result<usize, SqlClientError> {
        self.ensure_implicit_tx().await?;
        let sql_owned = sql.to_owned();
        let params = Params::convert(params);
        self.with_connection(move |guard| {
            let mut stmt = guard.prepare_cached(&sql_owned)?;
            execute_statement(&mut stmt, &params)
        })
        .await
    }

    async fn execute_many(
        &mut self,
        sql: &str,
        batch: &[BoundParams],
    ) -> Result<usize, SqlClientError> {
        self.ensure_implicit_tx().await?;
        let sql_owned = sql.to_owned();
        let batch: Vec<Params> = batch.iter().map(Params::convert).collect();
        let wrap = !self.in_transaction;
        self.with_connection(move |guard| {
            // a batch outside a transaction is still all-or-nothing
            let tx = if wrap {
                Some(guard.unchecked_transaction()?)
            } else {
                None
            };
            {
                let mut stmt = guard.prepare_cached(&sql_owned)?;
                for params in &batch {
                    execute_statement(&mut stmt, params)?;
                }
            }
            if let Some(tx) = tx {
                tx.commit()?;
            }
            Ok(batch.len())
        })
        .await
    }

    async fn fetch_all(
        &mut self,
        sql: &str,
        params: &BoundParams,
    ) -> Result<ResultSet, SqlClientError> {
        self.ensure_implicit_tx().await?;
        let sql_owned = sql.to_owned();
        let params = Params::convert(params);
        self.with_connection(move |guard| {
            let mut stmt = guard.prepare_cached(&sql_owned)?;
            build_result_set(&mut stmt, &params)
        })
        .await
    }

    async fn begin(&mut self) -> Result<(), SqlClientError> {
        if self.in_transaction {
            return Ok(());
        }
        self.batch(self.dialect.begin_sql).await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), SqlClientError> {
        if !self.in_transaction {
            return Ok(());
        }
        self.batch("COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), SqlClientError> {
        if !self.in_transaction {
            return Ok(());
        }
        // a failed statement may already have ended the transaction
        let result = self
            .with_connection(|guard| {
                if guard.is_autocommit() {
                    Ok(())
                } else {
                    Ok(guard.execute_batch("ROLLBACK")?)
                }
            })
            .await;
        self.in_transaction = false;
        result
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    async fn set_autocommit(&mut self, autocommit: bool) -> Result<(), SqlClientError> {
        if autocommit && !self.autocommit && self.in_transaction {
            self.commit().await?;
        }
        self.autocommit = autocommit;
        Ok(())
    }

    fn autocommit(&self) -> bool {
        self.autocommit
    }

    async fn ping(&mut self) -> Result<(), SqlClientError> {
        self.with_connection(|guard| {
            guard.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
        .await
    }

    async fn close(&mut self) -> Result<(), SqlClientError> {
        self.in_transaction = false;
        let Some(handle) = self.conn.take() else {
            return Ok(());
        };
        match Arc::try_unwrap(handle) {
            Ok(mutex) => {
                let conn = mutex.into_inner();
                tokio::task::spawn_blocking(move || conn.close().map_err(|(_, e)| e))
                    .await
                    .map_err(|e| {
                        SqlClientError::ConnectionError(format!(
                            "sqlite spawn_blocking join error: {e}"
                        ))
                    })??;
                Ok(())
            }
            // still shared with a blocking task; dropping the last handle closes it
            Err(_) => Ok(()),
        }
    }

    fn is_connectivity_error(&self, err: &SqlClientError) -> bool {
        super::is_connectivity_error(err)
    }
}
