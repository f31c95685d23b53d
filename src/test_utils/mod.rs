//! In-memory driver for exercising the client without a database.
//!
//! A [`MockConnector`] hands out connections that share one [`MockState`]: tests script
//! failures and query results up front, then inspect the statements, commits, rollbacks and
//! reconnects the client produced.
//!
//! ```rust
//! use sql_client::test_utils::{Failure, MockConnector};
//!
//! let connector = MockConnector::sqlite();
//! connector.fail_next(Failure::Connectivity("socket reset".into()));
//! assert_eq!(connector.connects(), 0);
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::dialect::Dialect;
use crate::driver::{BoundParams, Connection, Connector};
use crate::error::SqlClientError;
use crate::results::ResultSet;

/// A scripted failure for the next statement or connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// Reported as `SqlClientError::ConnectionError`.
    Connectivity(String),
    /// Reported as `SqlClientError::ExecutionError`.
    Statement(String),
}

impl Failure {
    fn into_error(self) -> SqlClientError {
        match self {
            Failure::Connectivity(msg) => SqlClientError::ConnectionError(msg),
            Failure::Statement(msg) => SqlClientError::ExecutionError(msg),
        }
    }
}

/// One statement as the driver received it.
#[derive(Debug, Clone, PartialEq)]
pub struct Executed {
    pub sql: String,
    pub params: Vec<BoundParams>,
}

/// Everything the mock connections did, plus what they still have to do.
#[derive(Debug, Default)]
pub struct MockState {
    pub executed: Vec<Executed>,
    pub connects: usize,
    pub closes: usize,
    pub begins: usize,
    pub commits: usize,
    pub rollbacks: usize,
    failures: VecDeque<Failure>,
    connect_failures: VecDeque<Failure>,
    results: VecDeque<ResultSet>,
    counts: VecDeque<usize>,
}

/// Connector over a shared [`MockState`].
#[derive(Debug, Clone)]
pub struct MockConnector {
    dialect: Dialect,
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    #[must_use]
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    #[must_use]
    pub fn sqlite() -> Self {
        Self::new(Dialect::sqlite())
    }

    #[must_use]
    pub fn postgres() -> Self {
        Self::new(Dialect::postgres())
    }

    /// Lock the shared state for inspection.
    pub fn state(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }

    /// Fail the next statement (`execute`, `execute_many` or `fetch_all`).
    pub fn fail_next(&self, failure: Failure) {
        self.state().failures.push_back(failure);
    }

    /// Fail the next connect.
    pub fn fail_connect(&self, failure: Failure) {
        self.state().connect_failures.push_back(failure);
    }

    /// Rows for the next `fetch_all`; once the queue is empty, fetches return no rows.
    pub fn push_result(&self, result: ResultSet) {
        self.state().results.push_back(result);
    }

    /// Affected count for the next `execute`; once the queue is empty, `execute` reports one
    /// row.
    pub fn push_count(&self, count: usize) {
        self.state().counts.push_back(count);
    }

    #[must_use]
    pub fn executed(&self) -> Vec<Executed> {
        self.state().executed.clone()
    }

    /// SQL text of every statement, in order.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.state().executed.iter().map(|e| e.sql.clone()).collect()
    }

    #[must_use]
    pub fn connects(&self) -> usize {
        self.state().connects
    }

    #[must_use]
    pub fn commits(&self) -> usize {
        self.state().commits
    }

    #[must_use]
    pub fn rollbacks(&self) -> usize {
        self.state().rollbacks
    }
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, SqlClientError> {
        let mut state = self.state();
        if let Some(failure) = state.connect_failures.pop_front() {
            return Err(failure.into_error());
        }
        state.connects += 1;
        Ok(Box::new(MockConnection {
            dialect: self.dialect.clone(),
            state: Arc::clone(&self.state),
            autocommit: true,
            in_transaction: false,
            closed: false,
        }))
    }

    fn dialect(&self) -> Dialect {
        self.dialect.clone()
    }
}

/// Connection handed out by [`MockConnector`].
#[derive(Debug)]
pub struct MockConnection {
    dialect: Dialect,
    state: Arc<Mutex<MockState>>,
    autocommit: bool,
    in_transaction: bool,
    closed: bool,
}

impl MockConnection {
    /// Record the statement, or pop the next scripted failure.
    fn record(&mut self, sql: &str, params: Vec<BoundParams>) -> Result<(), SqlClientError> {
        if self.closed {
            return Err(SqlClientError::ConnectionError("mock connection is closed".into()));
        }
        if !self.autocommit && !self.in_transaction {
            self.in_transaction = true;
            lock(&self.state).begins += 1;
        }
        let mut state = lock(&self.state);
        if let Some(failure) = state.failures.pop_front() {
            return Err(failure.into_error());
        }
        state.executed.push(Executed {
            sql: sql.to_string(),
            params,
        });
        Ok(())
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    async fn execute(&mut self, sql: &str, params: &BoundParams) -> Result<usize, SqlClientError> {
        self.record(sql, vec![params.clone()])?;
        Ok(lock(&self.state).counts.pop_front().unwrap_or(1))
    }

    async fn execute_many(
        &mut self,
        sql: &str,
        batch: &[BoundParams],
    ) -> Result<usize, SqlClientError> {
        self.record(sql, batch.to_vec())?;
        Ok(batch.len())
    }

    async fn fetch_all(
        &mut self,
        sql: &str,
        params: &BoundParams,
    ) -> Result<ResultSet, SqlClientError> {
        self.record(sql, vec![params.clone()])?;
        Ok(lock(&self.state).results.pop_front().unwrap_or_default())
    }

    async fn begin(&mut self) -> Result<(), SqlClientError> {
        if !self.in_transaction {
            self.in_transaction = true;
            lock(&self.state).begins += 1;
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), SqlClientError> {
        if self.in_transaction {
            self.in_transaction = false;
            lock(&self.state).commits += 1;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), SqlClientError> {
        if self.in_transaction {
            self.in_transaction = false;
            lock(&self.state).rollbacks += 1;
        }
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    async fn set_autocommit(&mut self, autocommit: bool) -> Result<(), SqlClientError> {
        if autocommit && !self.autocommit {
            self.commit().await?;
        }
        self.autocommit = autocommit;
        Ok(())
    }

    fn autocommit(&self) -> bool {
        self.autocommit
    }

    async fn ping(&mut self) -> Result<(), SqlClientError> {
        if self.closed {
            return Err(SqlClientError::ConnectionError("mock connection is closed".into()));
        }
        let mut state = lock(&self.state);
        match state.failures.pop_front() {
            Some(failure) => Err(failure.into_error()),
            None => Ok(()),
        }
    }

    async fn close(&mut self) -> Result<(), SqlClientError> {
        if !self.closed {
            self.closed = true;
            self.in_transaction = false;
            lock(&self.state).closes += 1;
        }
        Ok(())
    }
}
