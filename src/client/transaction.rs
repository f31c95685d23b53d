use std::ops::{Deref, DerefMut};

use async_trait::async_trait;

use crate::driver::Connector;
use crate::error::SqlClientError;
use crate::retry::{Lifecycle, RetryExecutor, RetryPolicy};

use super::SqlClient;

/// An open transaction, returned by [`SqlClient::begin`].
///
/// Carries the autocommit mode in force before `begin`; [`SqlClient::commit`] and
/// [`SqlClient::rollback`] consume it and restore that mode.
///
/// A statement that fails inside the scope rolls the whole transaction back, even when the retry
/// policy swallows the error. From then on the scope is aborted: further statements are refused
/// with `SqlClientError::TransactionError` and [`SqlClient::commit`] reports the abort instead of
/// committing.
#[must_use = "an open transaction must be committed or rolled back"]
#[derive(Debug)]
pub struct TxScope {
    prior_autocommit: bool,
}

impl TxScope {
    /// Autocommit mode restored when the scope ends.
    #[must_use]
    pub fn prior_autocommit(&self) -> bool {
        self.prior_autocommit
    }
}

impl<C: Connector> SqlClient<C> {
    /// Open a transaction; autocommit is off until the scope is committed or rolled back.
    ///
    /// Connectivity failures while opening are retried under the client's policy.
    ///
    /// # Errors
    /// Returns `SqlClientError::TransactionError` when a transaction is already open on this
    /// client, or the driver error from connecting or `BEGIN`.
    pub async fn begin(&mut self) -> Result<TxScope, SqlClientError> {
        let policy = self.config.retry.with_raise_error(true);
        self.begin_with(policy).await?.ok_or_else(|| {
            SqlClientError::TransactionError("transaction did not open".into())
        })
    }

    /// [`SqlClient::begin`] under `policy`; `None` when the policy swallowed the failure.
    pub(crate) async fn begin_with(
        &mut self,
        policy: RetryPolicy,
    ) -> Result<Option<TxScope>, SqlClientError> {
        self.settle().await;
        if self.tx_open {
            return Err(SqlClientError::TransactionError(
                "a transaction is already open on this client".into(),
            ));
        }
        let mut call = BeginCall { client: self };
        RetryExecutor::new(policy).run(&mut call).await
    }

    /// Whether a failed statement has aborted the open scope.
    #[must_use]
    pub fn scope_aborted(&self) -> bool {
        self.tx_open && self.tx_aborted
    }

    pub(crate) fn check_scope(&self) -> Result<(), SqlClientError> {
        if self.scope_aborted() {
            return Err(SqlClientError::TransactionError(
                "transaction scope aborted by an earlier error; roll it back".into(),
            ));
        }
        Ok(())
    }

    /// Commit and end the scope.
    ///
    /// # Errors
    /// Returns `SqlClientError::TransactionError` when the scope was aborted (it is rolled back
    /// instead), or the driver error from `COMMIT`; the scope is ended either way.
    pub async fn commit(&mut self, scope: TxScope) -> Result<(), SqlClientError> {
        if self.scope_aborted() {
            tracing::error!("commit of an aborted transaction scope; rolling back");
            let rolled_back = self.rollback_connection().await;
            self.end_scope(scope).await?;
            rolled_back?;
            return Err(SqlClientError::TransactionError(
                "transaction scope was aborted by an earlier error and has been rolled back".into(),
            ));
        }
        let result = match self.conn.as_mut() {
            Some(conn) => conn.commit().await,
            None => Ok(()),
        };
        if let Err(err) = &result {
            tracing::error!("commit failed: {}", err);
            if let Err(rollback) = self.rollback_connection().await {
                tracing::error!("rollback failed: {}", rollback);
            }
        }
        self.end_scope(scope).await?;
        result
    }

    /// Roll back and end the scope.
    ///
    /// # Errors
    /// Returns the driver error from `ROLLBACK`; the scope is ended either way.
    pub async fn rollback(&mut self, scope: TxScope) -> Result<(), SqlClientError> {
        let result = self.rollback_connection().await;
        self.end_scope(scope).await?;
        result
    }

    async fn end_scope(&mut self, scope: TxScope) -> Result<(), SqlClientError> {
        self.tx_open = false;
        self.tx_aborted = false;
        self.autocommit = scope.prior_autocommit;
        if let Some(conn) = self.conn.as_mut()
            && conn.autocommit() != scope.prior_autocommit
        {
            conn.set_autocommit(scope.prior_autocommit).await?;
        }
        Ok(())
    }

    /// Open a transaction bound to a guard.
    ///
    /// The guard derefs to the client, so statements run through it as usual. Dropping it
    /// without [`Transaction::commit`] rolls back before the client's next operation.
    ///
    /// ```rust,no_run
    /// # use sql_client::prelude::*;
    /// # async fn demo(client: &mut SqlClient<SqliteConnector>) -> Result<(), SqlClientError> {
    /// let mut tx = client.transaction().await?;
    /// tx.query("update jobs set tried = tried + 1 where id = ?").args(3).execute().await?;
    /// tx.commit().await?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    /// As for [`SqlClient::begin`].
    pub async fn transaction(&mut self) -> Result<Transaction<'_, C>, SqlClientError> {
        let scope = self.begin().await?;
        Ok(Transaction {
            client: self,
            scope: Some(scope),
        })
    }
}

struct BeginCall<'c, C: Connector> {
    client: &'c mut SqlClient<C>,
}

#[async_trait]
impl<'c, C: Connector> Lifecycle for BeginCall<'c, C> {
    type Output = Option<TxScope>;

    async fn attempt(&mut self) -> Result<Option<TxScope>, SqlClientError> {
        let prior_autocommit = self.client.autocommit;
        let conn = self.client.ensure_connection().await?;
        conn.set_autocommit(false).await?;
        if let Err(err) = conn.begin().await {
            if prior_autocommit
                && let Err(restore) = conn.set_autocommit(true).await
            {
                tracing::error!("restoring autocommit failed: {}", restore);
            }
            return Err(err);
        }
        self.client.autocommit = false;
        self.client.tx_open = true;
        self.client.tx_aborted = false;
        tracing::debug!("begin prior_autocommit={}", prior_autocommit);
        Ok(Some(TxScope { prior_autocommit }))
    }

    async fn reconnect(&mut self) -> Result<(), SqlClientError> {
        self.client.reconnect().await
    }

    async fn rollback(&mut self) -> Result<(), SqlClientError> {
        self.client.rollback_connection().await
    }

    fn is_connectivity_error(&self, err: &SqlClientError) -> bool {
        self.client.is_connectivity_error(err)
    }

    fn describe(&self) -> String {
        self.client.dialect.begin_sql.to_string()
    }
}

/// Scoped transaction guard from [`SqlClient::transaction`].
pub struct Transaction<'a, C: Connector> {
    client: &'a mut SqlClient<C>,
    scope: Option<TxScope>,
}

impl<C: Connector> Transaction<'_, C> {
    /// # Errors
    /// As for [`SqlClient::commit`].
    pub async fn commit(mut self) -> Result<(), SqlClientError> {
        match self.scope.take() {
            Some(scope) => self.client.commit(scope).await,
            None => Ok(()),
        }
    }

    /// # Errors
    /// As for [`SqlClient::rollback`].
    pub async fn rollback(mut self) -> Result<(), SqlClientError> {
        match self.scope.take() {
            Some(scope) => self.client.rollback(scope).await,
            None => Ok(()),
        }
    }
}

impl<C: Connector> Deref for Transaction<'_, C> {
    type Target = SqlClient<C>;

    fn deref(&self) -> &Self::Target {
        self.client
    }
}

impl<C: Connector> DerefMut for Transaction<'_, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.client
    }
}

impl<C: Connector> Drop for Transaction<'_, C> {
    fn drop(&mut self) {
        if let Some(scope) = self.scope.take() {
            tracing::warn!("transaction dropped without commit; rolling back");
            self.client.pending_rollback = Some(scope);
        }
    }
}
