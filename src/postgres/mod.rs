// PostgreSQL adapter
//
// - config: options and the connector
// - connection: the `Connection` implementation over tokio-postgres
// - params: RowValues to Postgres wire values
// - query: result extraction

pub mod config;
pub mod connection;
pub mod params;
pub mod query;

pub use config::{PostgresConnector, PostgresOptions};
pub use connection::PostgresConnection;
pub use params::Params;

use crate::error::SqlClientError;

/// `SQLSTATE` codes for an administrator or crash shutdown of the backend.
const SHUTDOWN_CODES: [&str; 3] = ["57P01", "57P02", "57P03"];

/// Closed sockets, I/O failures, class `08` (connection exception) and server shutdowns are
/// connectivity errors; everything else failed in the statement.
#[must_use]
pub fn is_connectivity_error(err: &SqlClientError) -> bool {
    match err {
        SqlClientError::PostgresError(e) => {
            if e.is_closed() {
                return true;
            }
            if let Some(state) = e.code() {
                let code = state.code();
                return code.starts_with("08") || SHUTDOWN_CODES.contains(&code);
            }
            std::error::Error::source(e).is_some_and(|source| source.is::<std::io::Error>())
        }
        other => other.category().is_retriable(),
    }
}
