use thiserror::Error;

#[cfg(feature = "sqlite")]
use rusqlite;
#[cfg(feature = "mssql")]
use tiberius;
#[cfg(feature = "postgres")]
use tokio_postgres;

#[derive(Debug, Error)]
pub enum SqlClientError {
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    PostgresError(#[from] tokio_postgres::Error),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[cfg(feature = "mssql")]
    #[error(transparent)]
    MssqlError(#[from] tiberius::error::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Parameter conversion error: {0}")]
    ParameterError(String),

    #[error("Argument normalization error: {0}")]
    NormalizationError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Transaction error: {0}")]
    TransactionError(String),

    #[error("Task claim conflict: {0}")]
    ClaimConflict(String),

    #[error("Unimplemented feature: {0}")]
    Unimplemented(String),

    #[error("Other database error: {0}")]
    Other(String),
}

/// Coarse classification used by the retry loop and callers deciding what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connection or interface level failure; retried with backoff and reconnect.
    Connectivity,
    /// The statement itself failed; rolled back and never retried.
    Statement,
    /// Caller arguments could not be shaped into a bindable batch.
    Normalization,
    /// A claim update did not cover every selected row.
    ClaimConflict,
    /// Invalid configuration or option combination.
    Configuration,
}

impl ErrorCategory {
    #[must_use]
    pub fn is_retriable(self) -> bool {
        matches!(self, ErrorCategory::Connectivity)
    }
}

impl SqlClientError {
    /// Driver-independent category of this error.
    ///
    /// Driver variants report `Statement` here; adapters refine that through
    /// [`crate::driver::Connection::is_connectivity_error`], which knows the driver's codes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            SqlClientError::ConnectionError(_) => ErrorCategory::Connectivity,
            SqlClientError::NormalizationError(_) | SqlClientError::ParameterError(_) => {
                ErrorCategory::Normalization
            }
            SqlClientError::ClaimConflict(_) => ErrorCategory::ClaimConflict,
            SqlClientError::ConfigError(_) | SqlClientError::Unimplemented(_) => {
                ErrorCategory::Configuration
            }
            _ => ErrorCategory::Statement,
        }
    }

    /// Errors raised before any database work; never swallowed by the retry policy.
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Normalization | ErrorCategory::Configuration
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connectivity_is_retriable() {
        let conn = SqlClientError::ConnectionError("reset by peer".into());
        let stmt = SqlClientError::ExecutionError("syntax error".into());
        assert!(conn.category().is_retriable());
        assert!(!stmt.category().is_retriable());
        assert!(!ErrorCategory::ClaimConflict.is_retriable());
    }

    #[test]
    fn caller_errors_are_flagged() {
        assert!(SqlClientError::NormalizationError("mixed batch".into()).is_caller_error());
        assert!(SqlClientError::ConfigError("host is required".into()).is_caller_error());
        assert!(!SqlClientError::TransactionError("nested".into()).is_caller_error());
    }
}
