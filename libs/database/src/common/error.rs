use serde::Serialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;

/// Machine-readable category of a [`DatabaseError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    ConnectionFailed,
    PoolExhausted,
    ConnectionTimeout,
    AuthenticationFailed,
    TlsFailure,
    ServerSelectionFailed,
    OperationFailed,
    QueryFailed,
    WriteFailed,
    TransactionFailed,
    InvalidConfiguration,
    NetworkFailure,
    NotInitialized,
    RetryExhausted,
    Unclassified,
}

impl ErrorKind {
    /// Stable error code exposed to API clients
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::ConnectionFailed => "DB_CONNECTION_ERROR",
            ErrorKind::PoolExhausted => "DB_POOL_EXHAUSTED",
            ErrorKind::ConnectionTimeout => "DB_CONNECTION_TIMEOUT",
            ErrorKind::AuthenticationFailed => "DB_AUTH_ERROR",
            ErrorKind::TlsFailure => "DB_SSL_ERROR",
            ErrorKind::ServerSelectionFailed => "DB_SERVER_SELECTION_ERROR",
            ErrorKind::OperationFailed => "DB_OPERATION_ERROR",
            ErrorKind::QueryFailed => "DB_QUERY_ERROR",
            ErrorKind::WriteFailed => "DB_WRITE_ERROR",
            ErrorKind::TransactionFailed => "DB_TRANSACTION_ERROR",
            ErrorKind::InvalidConfiguration => "DB_CONFIG_ERROR",
            ErrorKind::NetworkFailure => "DB_NETWORK_ERROR",
            ErrorKind::NotInitialized => "DB_NOT_INITIALIZED",
            ErrorKind::RetryExhausted => "DB_RETRY_EXHAUSTED",
            ErrorKind::Unclassified => "DB_ERROR",
        }
    }
}

/// Shape of a low-level driver failure, as far as the driver tells us
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    ServerSelection,
    ConnectionFailure,
    Authentication,
    Tls,
    NetworkTimeout,
    Dns,
    Configuration,
    Write,
    Command,
    Transaction,
    Other,
}

/// A driver failure normalized before classification.
///
/// Built from `mongodb::error::Error` by the Mongo driver, or directly by
/// alternative drivers and test doubles.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct DriverError {
    pub kind: DriverErrorKind,
    pub message: String,
    /// Server error code, when the failure came back from a command
    pub code: Option<i32>,
    #[source]
    source: Option<Arc<mongodb::error::Error>>,
}

impl DriverError {
    pub fn new(kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            source: None,
        }
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    pub(crate) fn with_source(mut self, source: mongodb::error::Error) -> Self {
        self.source = Some(Arc::new(source));
        self
    }
}

/// Unified error type for the database layer.
///
/// Nothing raw leaves the connection manager or diagnostics: driver failures are
/// classified into one of these variants with the driver error kept as the source.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("{message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<DriverError>,
    },

    #[error("{message}")]
    PoolExhausted {
        message: String,
        pool_size: u32,
        active_connections: u32,
    },

    #[error("{message}")]
    ConnectionTimeout {
        message: String,
        timeout_ms: Option<u64>,
        #[source]
        source: Option<DriverError>,
    },

    #[error("{message}")]
    AuthenticationFailed {
        message: String,
        #[source]
        source: Option<DriverError>,
    },

    #[error("{message}")]
    TlsFailure {
        message: String,
        #[source]
        source: Option<DriverError>,
    },

    #[error("{message}")]
    ServerSelectionFailed {
        message: String,
        #[source]
        source: Option<DriverError>,
    },

    #[error("{message}")]
    OperationFailed {
        message: String,
        operation: String,
        collection: Option<String>,
        #[source]
        source: Option<DriverError>,
    },

    #[error("{message}")]
    QueryFailed {
        message: String,
        query: Option<String>,
        collection: Option<String>,
        #[source]
        source: Option<DriverError>,
    },

    #[error("{message}")]
    WriteFailed {
        message: String,
        collection: Option<String>,
        write_concern: Option<String>,
        #[source]
        source: Option<DriverError>,
    },

    #[error("{message}")]
    TransactionFailed {
        message: String,
        transaction_id: Option<String>,
        #[source]
        source: Option<DriverError>,
    },

    #[error("{message}")]
    InvalidConfiguration {
        message: String,
        violations: Vec<String>,
    },

    #[error("{message}")]
    NetworkFailure {
        message: String,
        host: Option<String>,
        port: Option<u16>,
        #[source]
        source: Option<DriverError>,
    },

    #[error("{message}")]
    NotInitialized { message: String },

    #[error("{message}")]
    RetryExhausted {
        message: String,
        attempts: u32,
        #[source]
        last_error: Option<Box<DatabaseError>>,
    },

    #[error("{message}")]
    Unclassified {
        message: String,
        #[source]
        source: Option<DriverError>,
    },
}

/// Result type alias for database operations
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Serializable error body for API responses
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    pub details: Map<String, Value>,
}

const QUERY_PREVIEW_CHARS: usize = 200;

impl DatabaseError {
    pub fn not_initialized() -> Self {
        DatabaseError::NotInitialized {
            message: "Database not initialized. Call connect() first.".to_string(),
        }
    }

    pub fn invalid_configuration(violations: Vec<String>) -> Self {
        DatabaseError::InvalidConfiguration {
            message: "Invalid database configuration".to_string(),
            violations,
        }
    }

    pub fn connection_timeout(timeout_ms: u64, source: Option<DriverError>) -> Self {
        DatabaseError::ConnectionTimeout {
            message: format!("Database operation timed out after {}ms", timeout_ms),
            timeout_ms: Some(timeout_ms),
            source,
        }
    }

    /// Attach the operation/collection context to a driver failure
    pub fn operation(
        operation: impl Into<String>,
        collection: Option<&str>,
        source: DriverError,
    ) -> Self {
        let operation = operation.into();
        DatabaseError::OperationFailed {
            message: format!("MongoDB operation '{}' failed: {}", operation, source),
            operation,
            collection: collection.map(str::to_string),
            source: Some(source),
        }
    }

    /// A failed query; the rendered filter is truncated before it is kept
    pub fn query(query: Option<&str>, collection: Option<&str>, source: DriverError) -> Self {
        DatabaseError::QueryFailed {
            message: format!("Query execution failed: {}", source),
            query: query.map(|q| q.chars().take(QUERY_PREVIEW_CHARS).collect()),
            collection: collection.map(str::to_string),
            source: Some(source),
        }
    }

    pub fn transaction(source: DriverError) -> Self {
        DatabaseError::TransactionFailed {
            message: format!("Transaction failed: {}", source),
            transaction_id: None,
            source: Some(source),
        }
    }

    pub fn retry_exhausted(
        message: impl Into<String>,
        attempts: u32,
        last_error: Option<DatabaseError>,
    ) -> Self {
        let mut message = message.into();
        if let Some(last) = &last_error {
            message = format!("{}: {}", message, last);
        }
        DatabaseError::RetryExhausted {
            message,
            attempts,
            last_error: last_error.map(Box::new),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DatabaseError::ConnectionFailed { .. } => ErrorKind::ConnectionFailed,
            DatabaseError::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            DatabaseError::ConnectionTimeout { .. } => ErrorKind::ConnectionTimeout,
            DatabaseError::AuthenticationFailed { .. } => ErrorKind::AuthenticationFailed,
            DatabaseError::TlsFailure { .. } => ErrorKind::TlsFailure,
            DatabaseError::ServerSelectionFailed { .. } => ErrorKind::ServerSelectionFailed,
            DatabaseError::OperationFailed { .. } => ErrorKind::OperationFailed,
            DatabaseError::QueryFailed { .. } => ErrorKind::QueryFailed,
            DatabaseError::WriteFailed { .. } => ErrorKind::WriteFailed,
            DatabaseError::TransactionFailed { .. } => ErrorKind::TransactionFailed,
            DatabaseError::InvalidConfiguration { .. } => ErrorKind::InvalidConfiguration,
            DatabaseError::NetworkFailure { .. } => ErrorKind::NetworkFailure,
            DatabaseError::NotInitialized { .. } => ErrorKind::NotInitialized,
            DatabaseError::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            DatabaseError::Unclassified { .. } => ErrorKind::Unclassified,
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// The driver failure this error was classified from, if any
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            DatabaseError::ConnectionFailed { source, .. }
            | DatabaseError::ConnectionTimeout { source, .. }
            | DatabaseError::AuthenticationFailed { source, .. }
            | DatabaseError::TlsFailure { source, .. }
            | DatabaseError::ServerSelectionFailed { source, .. }
            | DatabaseError::OperationFailed { source, .. }
            | DatabaseError::QueryFailed { source, .. }
            | DatabaseError::WriteFailed { source, .. }
            | DatabaseError::TransactionFailed { source, .. }
            | DatabaseError::NetworkFailure { source, .. }
            | DatabaseError::Unclassified { source, .. } => source.as_ref(),
            DatabaseError::RetryExhausted { last_error, .. } => {
                last_error.as_deref().and_then(DatabaseError::driver_error)
            }
            DatabaseError::PoolExhausted { .. }
            | DatabaseError::InvalidConfiguration { .. }
            | DatabaseError::NotInitialized { .. } => None,
        }
    }

    /// Structured context for the error, keyed the same way across kinds
    pub fn details(&self) -> Map<String, Value> {
        let value = match self {
            DatabaseError::PoolExhausted {
                pool_size,
                active_connections,
                ..
            } => json!({ "pool_size": pool_size, "active_connections": active_connections }),
            DatabaseError::ConnectionTimeout { timeout_ms, .. } => {
                json!({ "timeout_ms": timeout_ms })
            }
            DatabaseError::OperationFailed {
                operation,
                collection,
                ..
            } => json!({ "operation": operation, "collection": collection }),
            DatabaseError::QueryFailed {
                query, collection, ..
            } => json!({ "query": query, "collection": collection }),
            DatabaseError::WriteFailed {
                collection,
                write_concern,
                ..
            } => json!({ "collection": collection, "write_concern": write_concern }),
            DatabaseError::TransactionFailed { transaction_id, .. } => {
                json!({ "transaction_id": transaction_id })
            }
            DatabaseError::InvalidConfiguration { violations, .. } => {
                json!({ "config_errors": violations })
            }
            DatabaseError::NetworkFailure { host, port, .. } => {
                json!({ "host": host, "port": port })
            }
            DatabaseError::RetryExhausted { attempts, .. } => json!({ "attempts": attempts }),
            _ => json!({}),
        };

        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: self.code(),
            message: self.to_string(),
            details: self.details(),
        }
    }

    /// Whether an HTTP layer should answer 503 rather than 500
    pub fn is_service_unavailable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NotInitialized
                | ErrorKind::RetryExhausted
                | ErrorKind::ConnectionFailed
                | ErrorKind::ConnectionTimeout
                | ErrorKind::ServerSelectionFailed
                | ErrorKind::NetworkFailure
                | ErrorKind::PoolExhausted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::error::Error as _;
    use strum::IntoEnumIterator;

    #[test]
    fn test_error_codes_are_unique() {
        let codes: HashSet<_> = ErrorKind::iter().map(|k| k.code()).collect();
        assert_eq!(codes.len(), ErrorKind::iter().count());
    }

    #[test]
    fn test_not_initialized_body() {
        let body = DatabaseError::not_initialized().to_body();
        assert_eq!(body.error, "DB_NOT_INITIALIZED");
        assert!(body.message.contains("not initialized"));
        assert!(body.details.is_empty());
    }

    #[test]
    fn test_invalid_configuration_details() {
        let err = DatabaseError::invalid_configuration(vec!["MongoDB URI is required".into()]);
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
        assert_eq!(
            err.details()["config_errors"],
            json!(["MongoDB URI is required"])
        );
        assert!(!err.is_service_unavailable());
    }

    #[test]
    fn test_retry_exhausted_keeps_last_error() {
        let last = DatabaseError::ConnectionFailed {
            message: "Failed to connect to MongoDB".into(),
            source: Some(DriverError::new(
                DriverErrorKind::ConnectionFailure,
                "connection refused",
            )),
        };
        let err = DatabaseError::retry_exhausted("Failed to reconnect", 3, Some(last));

        assert_eq!(err.kind(), ErrorKind::RetryExhausted);
        assert_eq!(err.details()["attempts"], json!(3));
        assert!(err.to_string().contains("Failed to connect to MongoDB"));
        assert!(err.is_service_unavailable());
        assert_eq!(
            err.driver_error().map(|d| d.message.as_str()),
            Some("connection refused")
        );

        let source = err.source().expect("retry exhaustion has a source");
        assert!(source.to_string().contains("Failed to connect"));
    }

    #[test]
    fn test_query_preview_is_truncated() {
        let long_filter = "x".repeat(500);
        let err = DatabaseError::query(
            Some(&long_filter),
            Some("stations"),
            DriverError::new(DriverErrorKind::Command, "bad filter"),
        );
        let details = err.details();
        assert_eq!(details["query"].as_str().map(str::len), Some(200));
        assert_eq!(details["collection"], json!("stations"));
    }

    #[test]
    fn test_error_kind_display_is_snake_case() {
        assert_eq!(ErrorKind::TlsFailure.to_string(), "tls_failure");
        assert_eq!(ErrorKind::RetryExhausted.to_string(), "retry_exhausted");
    }
}
