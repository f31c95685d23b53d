use std::fmt;

use async_trait::async_trait;
use tiberius::Query;

use crate::dialect::Dialect;
use crate::driver::{BoundParams, Connection};
use crate::error::SqlClientError;
use crate::results::ResultSet;

use super::config::MssqlClient;
use super::params::bind_query_params;
use super::query::{affected_rows, build_result_set};

/// One tiberius client over TCP.
pub struct MssqlConnection {
    client: Option<MssqlClient>,
    dialect: Dialect,
    autocommit: bool,
    in_transaction: bool,
}

impl MssqlConnection {
    pub(crate) fn new(client: MssqlClient, dialect: Dialect) -> Self {
        Self {
            client: Some(client),
            dialect,
            autocommit: true,
            in_transaction: false,
        }
    }

    fn client(&mut self) -> Result<&mut MssqlClient, SqlClientError> {
        self.client
            .as_mut()
            .ok_or_else(|| SqlClientError::ConnectionError("mssql connection is closed".into()))
    }

    async fn batch(&mut self, sql: &'static str) -> Result<(), SqlClientError> {
        Query::new(sql).execute(self.client()?).await?;
        Ok(())
    }

    async fn ensure_implicit_tx(&mut self) -> Result<(), SqlClientError> {
        if !self.autocommit && !self.in_transaction {
            self.begin().await?;
        }
        Ok(())
    }
}

impl fmt::Debug for MssqlConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MssqlConnection")
            .field("open", &self.client.is_some())
            .field("autocommit", &self.autocommit)
            .field("in_transaction", &self.in_transaction)
            .finish()
    }
}

#[async_trait]
impl Connection for MssqlConnection {
    fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    async fn execute(&mut self, sql: &str, params: &BoundParams) -> Result<usize, SqlClientError> {
        self.ensure_implicit_tx().await?;
        let query = bind_query_params(sql, params)?;
        let result = query.execute(self.client()?).await?;
        affected_rows(result.rows_affected())
    }

    async fn execute_many(
        &mut self,
        sql: &str,
        batch: &[BoundParams],
    ) -> Result<usize, SqlClientError> {
        self.ensure_implicit_tx().await?;
        let wrap = !self.in_transaction;
        if wrap {
            self.batch("BEGIN TRANSACTION").await?;
        }
        for params in batch {
            let outcome = match bind_query_params(sql, params) {
                Ok(query) => query.execute(self.client()?).await.map_err(Into::into),
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                if wrap && let Err(rollback) = self.batch("ROLLBACK TRANSACTION").await {
                    tracing::error!("mssql batch rollback failed: {}", rollback);
                }
                return Err(e);
            }
        }
        if wrap {
            self.batch("COMMIT TRANSACTION").await?;
        }
        Ok(batch.len())
    }

    async fn fetch_all(
        &mut self,
        sql: &str,
        params: &BoundParams,
    ) -> Result<ResultSet, SqlClientError> {
        self.ensure_implicit_tx().await?;
        let query = bind_query_params(sql, params)?;
        let stream = query.query(self.client()?).await?;
        build_result_set(stream).await
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
        self.batch("COMMIT TRANSACTION").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), SqlClientError> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        // a severe error may already have rolled the server side back
        self.batch("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await
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
        self.client()?
            .simple_query("SELECT 1")
            .await?
            .into_results()
            .await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SqlClientError> {
        self.in_transaction = false;
        if let Some(client) = self.client.take() {
            client.close().await?;
        }
        Ok(())
    }

    fn is_connectivity_error(&self, err: &SqlClientError) -> bool {
        super::is_connectivity_error(err)
    }
}
