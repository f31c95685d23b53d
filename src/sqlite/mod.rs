// SQLite adapter
//
// - config: options and the connector
// - connection: the `Connection` implementation over rusqlite
// - params: RowValues to rusqlite values, positional and named binding
// - query: statement execution and result extraction

pub mod config;
pub mod connection;
pub mod params;
pub mod query;

pub use config::{SqliteConnector, SqliteOptions};
pub use connection::SqliteConnection;

use rusqlite::ErrorCode;

use crate::error::SqlClientError;

/// Lock contention and I/O failures are worth a reconnect and retry; everything else is a
/// statement failure.
#[must_use]
pub fn is_connectivity_error(err: &SqlClientError) -> bool {
    match err {
        SqlClientError::SqliteError(rusqlite::Error::SqliteFailure(failure, _)) => matches!(
            failure.code,
            ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
        ),
        other => other.category().is_retriable(),
    }
}
