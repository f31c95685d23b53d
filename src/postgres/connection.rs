use std::fmt;

use async_trait::async_trait;
use tokio_postgres::Client;

use crate::dialect::Dialect;
use crate::driver::{BoundParams, Connection};
use crate::error::SqlClientError;
use crate::results::ResultSet;

use super::params::Params;
use super::query::{affected_rows, build_result_set_from_statement};

/// One `tokio-postgres` client.
///
/// Transactions are plain `BEGIN`/`COMMIT`/`ROLLBACK` statements so they can span calls on
/// `&mut self`.
pub struct PostgresConnection {
    client: Option<Client>,
    dialect: Dialect,
    autocommit: bool,
    in_transaction: bool,
}

impl PostgresConnection {
    pub(crate) fn new(client: Client, dialect: Dialect) -> Self {
        Self {
            client: Some(client),
            dialect,
            autocommit: true,
            in_transaction: false,
        }
    }

    fn client(&self) -> Result<&Client, SqlClientError> {
        match &self.client {
            Some(client) if !client.is_closed() => Ok(client),
            _ => Err(SqlClientError::ConnectionError(
                "postgres connection is closed".into(),
            )),
        }
    }

    async fn ensure_implicit_tx(&mut self) -> Result<(), SqlClientError> {
        if !self.autocommit && !self.in_transaction {
            self.begin().await?;
        }
        Ok(())
    }
}

impl fmt::Debug for PostgresConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConnection")
            .field("open", &self.client.is_some())
            .field("autocommit", &self.autocommit)
            .field("in_transaction", &self.in_transaction)
            .finish()
    }
}

#[async_trait]
impl Connection for PostgresConnection {
    fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    async fn execute(&mut self, sql: &str, params: &BoundParams) -> Result<usize, SqlClientError> {
        self.ensure_implicit_tx().await?;
        let converted = Params::convert(params)?;
        let client = self.client()?;
        let stmt = client.prepare(sql).await?;
        if stmt.columns().is_empty() {
            affected_rows(client.execute(&stmt, converted.as_refs()).await?)
        } else {
            Ok(client.query(&stmt, converted.as_refs()).await?.len())
        }
    }

    async fn execute_many(
        &mut self,
        sql: &str,
        batch: &[BoundParams],
    ) -> Result<usize, SqlClientError> {
        self.ensure_implicit_tx().await?;
        let wrap = !self.in_transaction;
        let client = self.client()?;
        let stmt = client.prepare(sql).await?;
        if wrap {
            client.batch_execute("BEGIN").await?;
        }
        for params in batch {
            let converted = Params::convert(params)?;
            if let Err(e) = client.execute(&stmt, converted.as_refs()).await {
                if wrap && let Err(rollback) = client.batch_execute("ROLLBACK").await {
                    tracing::error!("postgres batch rollback failed: {}", rollback);
                }
                return Err(e.into());
            }
        }
        if wrap {
            client.batch_execute("COMMIT").await?;
        }
        Ok(batch.len())
    }

    async fn fetch_all(
        &mut self,
        sql: &str,
        params: &BoundParams,
    ) -> Result<ResultSet, SqlClientError> {
        self.ensure_implicit_tx().await?;
        let converted = Params::convert(params)?;
        let client = self.client()?;
        let stmt = client.prepare(sql).await?;
        let rows = client.query(&stmt, converted.as_refs()).await?;
        build_result_set_from_statement(&stmt, &rows)
    }

    async fn begin(&mut self) -> Result<(), SqlClientError> {
        if self.in_transaction {
            return Ok(());
        }
        self.client()?.batch_execute(self.dialect.begin_sql).await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), SqlClientError> {
        if !self.in_transaction {
            return Ok(());
        }
        self.client()?.batch_execute("COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), SqlClientError> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.client()?.batch_execute("ROLLBACK").await?;
        Ok(())
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
        self.client()?.simple_query("SELECT 1").await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SqlClientError> {
        self.in_transaction = false;
        // dropping the client ends the spawned connection task
        self.client = None;
        Ok(())
    }

    fn is_connectivity_error(&self, err: &SqlClientError) -> bool {
        super::is_connectivity_error(err)
    }
}
