//! Async SQL client for `SQLite`, `PostgreSQL` and SQL Server.
//!
//! Statements are written in any of the five common bind styles and rewritten into the one the
//! driver expects; arguments may be scalars, tuples, mappings or batches of either. Every call
//! retries connectivity failures with a reconnect, and a row-based task lease (`claim_tasks`,
//! `end_tasks`, `fail_tasks`, `cancel_tasks`) lets several workers share one table as a queue.
//!
//! ```rust,no_run
//! use sql_client::prelude::*;
//!
//! # async fn demo() -> Result<(), SqlClientError> {
//! let config = ClientConfig::new(DatabaseType::Sqlite).with_database("jobs.db");
//! let mut client = SqlClient::new(SqliteConnector::from_config(&config)?, config);
//! let rows = client
//!     .query("select id, name from jobs where tried = %(tried)s")
//!     .args(Argument::named([("tried", 0)]))
//!     .select()
//!     .await?;
//! # let _ = rows;
//! # Ok(())
//! # }
//! ```

pub mod args;
pub mod client;
pub mod config;
pub mod dialect;
pub mod driver;
pub mod error;
pub mod prelude;
pub mod results;
pub mod retry;
pub mod sql_builder;
pub mod task;
pub mod translation;
pub mod types;

#[cfg(feature = "mssql")]
pub mod mssql;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use args::{Argument, Record};
pub use client::{QueryOptions, SaveOptions, SqlClient};
pub use config::ClientConfig;
pub use error::SqlClientError;
pub use results::{CustomDbRow, ResultSet};
pub use types::{DatabaseType, RowValues};
