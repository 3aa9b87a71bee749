//! Error types for the query engine.
//!
//! All failures surface as [`DbError`]. Validation and generation errors are raised
//! locally and never reach a driver; driver errors are wrapped with the statement
//! that produced them so failures can be diagnosed from the log alone.

use crate::models::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Validation failed for '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("Unsupported operation for {dialect}: {feature}")]
    UnsupportedOperation { dialect: String, feature: String },

    #[error("Connection failed: {message}")]
    Connect { message: String, suggestion: String },

    #[error("Execution failed: {message}")]
    Execution {
        message: String,
        /// e.g., "23505" for a unique violation on PostgreSQL
        sql_state: Option<String>,
        /// Statement text that failed, empty when the failure was not statement-bound.
        statement: String,
        /// Rendered parameters, or a redaction marker.
        params: String,
    },

    #[error("Transaction error: {message}")]
    Transaction { message: String },

    #[error("Pool exhausted: no connection available within {waited_ms}ms (capacity: {capacity})")]
    PoolExhausted { waited_ms: u64, capacity: u32 },

    #[error("Pool is closed")]
    PoolClosed,

    #[error("Querier has been released and can no longer be used")]
    QuerierClosed,

    #[error("A transaction is already active on this querier")]
    NestedTransaction,

    #[error("No {entity} matched the given criteria")]
    NotFound { entity: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a validation error naming the offending field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an unsupported operation error.
    pub fn unsupported(dialect: impl std::fmt::Display, feature: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            dialect: dialect.to_string(),
            feature: feature.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connect(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an execution error that is not yet bound to a statement.
    pub fn execution(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Execution {
            message: message.into(),
            sql_state,
            statement: String::new(),
            params: String::new(),
        }
    }

    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Create a pool exhausted error.
    pub fn pool_exhausted(waited_ms: u64, capacity: u32) -> Self {
        Self::PoolExhausted {
            waited_ms,
            capacity,
        }
    }

    /// Create a not found error.
    pub fn not_found(entity: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Attach the originating statement to an execution error.
    ///
    /// Parameters are only rendered when `include_params` is set; otherwise the
    /// count is recorded so that bound values never leak into logs by default.
    pub fn with_statement(self, text: &str, params: &[Value], include_params: bool) -> Self {
        match self {
            Self::Execution {
                message, sql_state, ..
            } => Self::Execution {
                message,
                sql_state,
                statement: text.to_string(),
                params: render_params(params, include_params),
            },
            other => other,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connect { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Get the SQLSTATE reported by the driver, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Execution { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Check if this error is retryable by the caller. The engine never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::PoolExhausted { .. })
    }

    /// True when the connection that produced this error should not be reused.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Internal { .. })
    }
}

fn render_params(params: &[Value], include_params: bool) -> String {
    if include_params {
        format!("{:?}", params)
    } else {
        format!("[{} redacted]", params.len())
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connect(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::execution(db_err.message(), code)
            }
            sqlx::Error::RowNotFound => DbError::execution("No rows returned", None),
            sqlx::Error::PoolTimedOut => DbError::pool_exhausted(0, 0),
            sqlx::Error::PoolClosed => DbError::PoolClosed,
            sqlx::Error::Io(io_err) => DbError::connect(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connect(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connect(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => {
                DbError::execution(format!("Type not found: {}", type_name), None)
            }
            sqlx::Error::ColumnNotFound(col) => {
                DbError::execution(format!("Column not found: {}", col), None)
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::Encode(source) => {
                DbError::execution(format!("Failed to bind parameter: {}", source), None)
            }
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for engine operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connect("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_validation_names_field() {
        let err = DbError::validation("emial", "unknown property on User");
        assert!(matches!(&err, DbError::Validation { field, .. } if field == "emial"));
        assert!(err.to_string().contains("emial"));
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::pool_exhausted(100, 2).is_retryable());
        assert!(DbError::connect("err", "sugg").is_retryable());
        assert!(!DbError::validation("limit", "negative").is_retryable());
        assert!(!DbError::execution("syntax", None).is_retryable());
    }

    #[test]
    fn test_with_statement_redacts_params_by_default() {
        let err = DbError::execution("unique violation", Some("23505".to_string()))
            .with_statement(
                "INSERT INTO \"User\" (\"email\") VALUES ($1)",
                &[Value::Text("secret@x.com".to_string())],
                false,
            );
        match err {
            DbError::Execution {
                statement, params, ..
            } => {
                assert!(statement.starts_with("INSERT INTO"));
                assert!(!params.contains("secret"));
                assert_eq!(params, "[1 redacted]");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_with_statement_includes_params_when_allowed() {
        let err = DbError::execution("boom", None).with_statement(
            "SELECT 1",
            &[Value::Int(7)],
            true,
        );
        match err {
            DbError::Execution { params, .. } => assert!(params.contains('7')),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_with_statement_leaves_other_errors() {
        let err = DbError::QuerierClosed.with_statement("SELECT 1", &[], true);
        assert!(matches!(err, DbError::QuerierClosed));
    }

    #[test]
    fn test_sql_state_accessor() {
        let err = DbError::execution("dup", Some("23505".to_string()));
        assert_eq!(err.sql_state(), Some("23505"));
        assert_eq!(DbError::PoolClosed.sql_state(), None);
    }

    #[test]
    fn test_bind_failure_keeps_connection() {
        let err = DbError::from(sqlx::Error::Encode("'abc' is not a valid INT4".into()));
        assert!(matches!(err, DbError::Execution { .. }));
        assert!(!err.is_connection_fatal());
    }
}
