//! Convenient imports for common functionality.
//!
//! This module re-exports the types most callers need to build a client, run statements and
//! work a task table.

pub use crate::args::{Argument, Record};
pub use crate::client::{
    BatchMode, QueryBuilder, QueryOptions, SaveOptions, SqlClient, Transaction, TxScope,
};
pub use crate::config::ClientConfig;
pub use crate::dialect::Dialect;
pub use crate::driver::{Connection, Connector};
pub use crate::error::{ErrorCategory, SqlClientError};
pub use crate::results::{Chunks, CustomDbRow, ResultSet};
pub use crate::retry::{RetryOverrides, RetryPolicy};
pub use crate::sql_builder::Sql;
pub use crate::task::{
    Assignment, ClaimOptions, Comparison, CounterUpdate, Outcome, ResolveOverrides, TaskTable,
    TimeFilter, TimeUpdate, TriedFilter,
};
pub use crate::translation::ParamStyle;
pub use crate::types::{DatabaseType, RowValues};

#[cfg(feature = "sqlite")]
pub use crate::sqlite::{SqliteConnection, SqliteConnector, SqliteOptions};

#[cfg(feature = "postgres")]
pub use crate::postgres::{PostgresConnection, PostgresConnector, PostgresOptions};

#[cfg(feature = "mssql")]
pub use crate::mssql::{MssqlConnection, MssqlConnector, MssqlOptions};
