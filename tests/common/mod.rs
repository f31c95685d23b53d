#![cfg(feature = "sqlite")]
#![allow(dead_code)]

use std::path::Path;

use sql_client::prelude::*;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A client on a fresh `SQLite` file, raising errors instead of swallowing them.
pub fn sqlite_client(path: &Path) -> Result<SqlClient<SqliteConnector>, SqlClientError> {
    let config = ClientConfig::new(DatabaseType::Sqlite)
        .with_database(path.to_string_lossy())
        .with_retry(RetryPolicy::default().with_raise_error(true));
    Ok(SqlClient::new(SqliteConnector::from_config(&config)?, config))
}

pub async fn count(
    client: &mut SqlClient<SqliteConnector>,
    table: &str,
) -> Result<i64, SqlClientError> {
    let rows = client
        .query(format!("select count(*) as n from {table}"))
        .select()
        .await?;
    rows.results
        .first()
        .and_then(|row| row.get("n"))
        .and_then(RowValues::as_int)
        .copied()
        .ok_or_else(|| SqlClientError::ExecutionError("missing count".into()))
}
