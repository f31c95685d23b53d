// SQL Server adapter
//
// - config: options and the connector
// - connection: the `Connection` implementation over tiberius
// - params: binding RowValues onto a tiberius query
// - query: result extraction

pub mod config;
pub mod connection;
pub mod params;
pub mod query;

pub use config::{MssqlClient, MssqlConnector, MssqlOptions};
pub use connection::MssqlConnection;

use tiberius::error::Error as TiberiusError;

use crate::error::SqlClientError;

/// Socket, TLS and routing failures are connectivity errors; server and conversion errors
/// belong to the statement.
#[must_use]
pub fn is_connectivity_error(err: &SqlClientError) -> bool {
    match err {
        SqlClientError::MssqlError(e) => matches!(
            e,
            TiberiusError::Io { .. } | TiberiusError::Tls(_) | TiberiusError::Routing { .. }
        ),
        other => other.category().is_retriable(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_is_connectivity_conversion_is_not() {
        let io = SqlClientError::MssqlError(TiberiusError::Io {
            kind: std::io::ErrorKind::ConnectionReset,
            message: "reset by peer".into(),
        });
        let conversion = SqlClientError::MssqlError(TiberiusError::Conversion(
            "bad value".into(),
        ));
        assert!(is_connectivity_error(&io));
        assert!(!is_connectivity_error(&conversion));
    }
}
