//! Error types for the RuVector PostgreSQL bridge.

use thiserror::Error;

/// Result type alias used throughout the bridge.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for bridge operations.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// A method was called before `initialize` completed successfully.
    #[error("bridge not initialized")]
    NotInitialized,

    /// The pool could not establish or maintain a connection.
    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    /// A query or connection attempt exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// No connection became available within the pool's acquisition timeout.
    #[error("connection pool exhausted: {0}")]
    PoolExhausted(String),

    /// PostgreSQL rejected a statement (syntax, constraint, type mismatch, ...).
    #[error("sql error ({}): {message}", code.as_deref().unwrap_or("none"))]
    SqlError {
        /// SQLSTATE code, when PostgreSQL reported one.
        code: Option<String>,
        message: String,
    },

    /// Input failed validation before any SQL was issued.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// An operation was attempted that the current transaction state forbids
    /// (e.g. releasing a savepoint that was never opened).
    #[error("transaction state error: {0}")]
    TransactionStateError(String),

    /// A required PostgreSQL extension (pgvector) is not installed.
    #[error("required extension missing: {0}")]
    ExtensionMissing(String),
}

impl Error {
    /// Whether the operation that produced this error is safe to retry.
    ///
    /// Mirrors the SQLSTATE classification used by the connection manager's
    /// retry loop: connection-class failures, transaction rollback class
    /// (deadlock/serialization failure), and admin shutdown/crash recovery
    /// are transient; constraint and syntax errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::ConnectionFailure(_) | Error::Timeout(_) | Error::PoolExhausted(_) => true,
            Error::SqlError { code: Some(code), .. } => {
                code.starts_with("40") || code.starts_with("08") || is_admin_shutdown(code)
            }
            _ => false,
        }
    }
}

fn is_admin_shutdown(code: &str) -> bool {
    matches!(code, "57P01" | "57P02" | "57P03")
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::ValidationError(format!("invalid JSON: {err}"))
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::Error as SqlxError;
        match &err {
            SqlxError::Configuration(_) => Error::ConnectionFailure(err.to_string()),
            SqlxError::Database(db_err) => {
                let code = db_err.code().map(|c| c.into_owned());
                if let Some(code) = &code {
                    let code_str: &str = code;
                    match code_str {
                        "23502" | "23514" => {
                            return Error::ValidationError(db_err.message().to_string())
                        }
                        "23505" | "23503" | "23P01" => {
                            return Error::SqlError {
                                code: Some(code.clone()),
                                message: db_err.message().to_string(),
                            }
                        }
                        _ => {}
                    }
                }
                Error::SqlError {
                    code,
                    message: db_err.message().to_string(),
                }
            }
            SqlxError::Io(_) | SqlxError::Tls(_) | SqlxError::Protocol(_) => {
                Error::ConnectionFailure(err.to_string())
            }
            SqlxError::PoolTimedOut => Error::PoolExhausted("timed out waiting for a connection".into()),
            SqlxError::PoolClosed => Error::ConnectionFailure("connection pool closed".into()),
            SqlxError::RowNotFound => Error::SqlError {
                code: None,
                message: "row not found".into(),
            },
            SqlxError::ColumnNotFound(name) => Error::SqlError {
                code: None,
                message: format!("column not found: {name}"),
            },
            SqlxError::ColumnDecode { index, source } => Error::SqlError {
                code: None,
                message: format!("failed to decode column {index}: {source}"),
            },
            SqlxError::TypeNotFound { type_name } => Error::ExtensionMissing(format!(
                "type `{type_name}` is unknown to the server (pgvector installed?)"
            )),
            _ => Error::SqlError {
                code: None,
                message: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_initialized_display() {
        assert_eq!(Error::NotInitialized.to_string(), "bridge not initialized");
    }

    #[test]
    fn sql_error_display_includes_code() {
        let err = Error::SqlError {
            code: Some("42601".into()),
            message: "syntax error".into(),
        };
        assert_eq!(err.to_string(), "sql error (42601): syntax error");
    }

    #[test]
    fn connection_and_timeout_and_pool_are_retryable() {
        assert!(Error::ConnectionFailure("refused".into()).is_retryable());
        assert!(Error::Timeout("slow".into()).is_retryable());
        assert!(Error::PoolExhausted("full".into()).is_retryable());
    }

    #[test]
    fn validation_and_transaction_state_are_not_retryable() {
        assert!(!Error::ValidationError("bad".into()).is_retryable());
        assert!(!Error::TransactionStateError("bad".into()).is_retryable());
        assert!(!Error::ExtensionMissing("vector".into()).is_retryable());
    }

    #[test]
    fn sql_error_retryable_by_sqlstate_class() {
        let deadlock = Error::SqlError {
            code: Some("40P01".into()),
            message: "deadlock detected".into(),
        };
        assert!(deadlock.is_retryable());

        let connection_class = Error::SqlError {
            code: Some("08006".into()),
            message: "connection failure".into(),
        };
        assert!(connection_class.is_retryable());

        let admin_shutdown = Error::SqlError {
            code: Some("57P01".into()),
            message: "admin shutdown".into(),
        };
        assert!(admin_shutdown.is_retryable());

        let unique_violation = Error::SqlError {
            code: Some("23505".into()),
            message: "duplicate key".into(),
        };
        assert!(!unique_violation.is_retryable());
    }

    #[test]
    fn sql_error_with_no_code_is_not_retryable() {
        let err = Error::SqlError {
            code: None,
            message: "row not found".into(),
        };
        assert!(!err.is_retryable());
    }
}
