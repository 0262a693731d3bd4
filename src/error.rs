//! Error types for the CRM data-access core.
//!
//! This module defines all error types using `thiserror`. Driver errors
//! (sqlx, tiberius) are mapped into this taxonomy at the adapter boundary, so
//! callers only ever see [`DbError`]. Messages carry backend detail for logs;
//! [`DbError::user_message`] is what may cross the UI boundary.

use thiserror::Error;

/// Message shown to end users for any failure that reached the UI boundary.
pub const GENERIC_FAILURE_MESSAGE: &str = "The operation failed. Please try again later.";

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Query failed: {message}")]
    Query {
        message: String,
        /// Backend error code, e.g. "1062" (MySQL) or "2627" (SQL Server)
        code: Option<String>,
        suggestion: String,
    },

    #[error("Timeout: {operation} exceeded {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("Decode error: {message}")]
    Decode { message: String },
}

impl DbError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a query error with an optional backend error code.
    pub fn query(
        message: impl Into<String>,
        code: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Query {
            message: message.into(),
            code,
            suggestion: suggestion.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms,
        }
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Query { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }

    /// Text that is safe to show at the UI boundary.
    ///
    /// Backend messages and parameter values never leave through here.
    /// Validation and configuration messages describe the caller's own input
    /// and are passed through.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation { message } => message.clone(),
            Self::Configuration { .. }
            | Self::Connection { .. }
            | Self::Query { .. }
            | Self::Timeout { .. }
            | Self::Decode { .. } => GENERIC_FAILURE_MESSAGE.to_string(),
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::configuration(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::query(
                    db_err.message(),
                    code,
                    "Check the SQL syntax, referenced objects and constraints",
                )
            }
            sqlx::Error::RowNotFound => DbError::query(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::connection(
                "Timed out acquiring a connection from the pool",
                "Increase DB_POOL_ACQUIRE_TIMEOUT_SECS or DB_POOL_MAX, or look for leaked connections",
            ),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reopen the database client")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify DB_ENCRYPT, DB_TRUST_SERVER_CERTIFICATE and the CA certificate",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::decode(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::decode(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::decode(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => {
                DbError::connection("Database worker crashed", "Reopen the database client")
            }
            _ => DbError::query(
                format!("Unknown database error: {}", err),
                None,
                "Inspect the server logs for details",
            ),
        }
    }
}

/// Convert SQL Server driver errors to DbError.
impl From<tiberius::error::Error> for DbError {
    fn from(err: tiberius::error::Error) -> Self {
        use tiberius::error::Error as TdsError;

        match err {
            TdsError::Server(token) => DbError::query(
                token.message().to_string(),
                Some(token.code().to_string()),
                "Check the SQL syntax, referenced objects and constraints",
            ),
            TdsError::Io { kind, message } => DbError::connection(
                format!("I/O error ({:?}): {}", kind, message),
                "Check network connectivity and database server status",
            ),
            TdsError::Tls(msg) => DbError::connection(
                format!("TLS error: {}", msg),
                "Verify DB_ENCRYPT and DB_TRUST_SERVER_CERTIFICATE",
            ),
            TdsError::Routing { host, port } => DbError::connection(
                format!("Server requested a redirect to {}:{}", host, port),
                "Connect to the redirected host directly",
            ),
            TdsError::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            TdsError::Conversion(msg) => DbError::decode(format!("Conversion error: {}", msg)),
            other => DbError::query(
                format!("SQL Server error: {}", other),
                None,
                "Inspect the server logs for details",
            ),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::query("Syntax error", Some("1064".to_string()), "Check SQL syntax");
        assert_eq!(err.suggestion(), Some("Check SQL syntax"));
        assert_eq!(DbError::validation("too long").suggestion(), None);
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::timeout("query", 30).is_retryable());
        assert!(DbError::connection("err", "sugg").is_retryable());
        assert!(!DbError::validation("too many params").is_retryable());
        assert!(!DbError::query("dup", None, "sugg").is_retryable());
    }

    #[test]
    fn test_user_message_hides_backend_text() {
        let err = DbError::query(
            "Duplicate entry 'a@b.com' for key 'email'",
            Some("1062".to_string()),
            "check constraints",
        );
        let msg = err.user_message();
        assert_eq!(msg, GENERIC_FAILURE_MESSAGE);
        assert!(!msg.contains("a@b.com"));

        let err = DbError::connection("host db.internal refused", "retry");
        assert_eq!(err.user_message(), GENERIC_FAILURE_MESSAGE);
    }

    #[test]
    fn test_user_message_keeps_validation_text() {
        let err = DbError::validation("Query text exceeds 10000 characters");
        assert!(err.user_message().contains("10000"));
    }

    #[test]
    fn test_sqlx_pool_timeout_maps_to_connection() {
        let err: DbError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, DbError::Connection { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_sqlx_row_not_found_maps_to_query() {
        let err: DbError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, DbError::Query { .. }));
    }
}
