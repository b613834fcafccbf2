//! Mapping of low-level driver failures onto [`DatabaseError`] kinds.
//!
//! Structured driver kinds decide first. Message substrings only refine
//! connection failures and otherwise-unrecognized errors.

use super::error::{DatabaseError, DriverError, DriverErrorKind};
use mongodb::error::ErrorKind as MongoErrorKind;

/// Server code for a failed authentication handshake
const AUTHENTICATION_FAILED_CODE: i32 = 18;

/// Pick the most specific [`DatabaseError`] for a driver failure.
///
/// Total and deterministic: every input maps to exactly one kind, and errors
/// nothing recognizes become [`DatabaseError::Unclassified`] with the driver
/// error preserved as the source.
pub fn classify(error: DriverError) -> DatabaseError {
    let lowered = error.message.to_lowercase();

    match error.kind {
        DriverErrorKind::ServerSelection => DatabaseError::ServerSelectionFailed {
            message: format!("Could not select a MongoDB server: {}", error.message),
            source: Some(error),
        },
        DriverErrorKind::ConnectionFailure if lowered.contains("auth") => {
            DatabaseError::AuthenticationFailed {
                message: format!("MongoDB authentication failed: {}", error.message),
                source: Some(error),
            }
        }
        DriverErrorKind::ConnectionFailure if is_tls_message(&lowered) => {
            DatabaseError::TlsFailure {
                message: format!("MongoDB TLS handshake failed: {}", error.message),
                source: Some(error),
            }
        }
        DriverErrorKind::ConnectionFailure => DatabaseError::ConnectionFailed {
            message: format!("Failed to connect to MongoDB: {}", error.message),
            source: Some(error),
        },
        DriverErrorKind::Authentication => DatabaseError::AuthenticationFailed {
            message: format!("MongoDB authentication failed: {}", error.message),
            source: Some(error),
        },
        DriverErrorKind::Tls => DatabaseError::TlsFailure {
            message: format!("MongoDB TLS handshake failed: {}", error.message),
            source: Some(error),
        },
        DriverErrorKind::Configuration => DatabaseError::InvalidConfiguration {
            message: format!("Invalid MongoDB client configuration: {}", error.message),
            violations: vec![error.message],
        },
        DriverErrorKind::NetworkTimeout => DatabaseError::ConnectionTimeout {
            message: format!("MongoDB connection timed out: {}", error.message),
            timeout_ms: None,
            source: Some(error),
        },
        DriverErrorKind::Dns => DatabaseError::NetworkFailure {
            message: format!("MongoDB host resolution failed: {}", error.message),
            host: None,
            port: None,
            source: Some(error),
        },
        DriverErrorKind::Write => DatabaseError::WriteFailed {
            message: format!("MongoDB write failed: {}", error.message),
            collection: None,
            write_concern: None,
            source: Some(error),
        },
        DriverErrorKind::Transaction => DatabaseError::transaction(error),
        DriverErrorKind::Command
            if error.code == Some(AUTHENTICATION_FAILED_CODE)
                || lowered.contains("authentication") =>
        {
            DatabaseError::AuthenticationFailed {
                message: format!("MongoDB authentication failed: {}", error.message),
                source: Some(error),
            }
        }
        DriverErrorKind::Command => DatabaseError::OperationFailed {
            message: format!("MongoDB operation failed: {}", error.message),
            operation: "command".to_string(),
            collection: None,
            source: Some(error),
        },
        DriverErrorKind::Other if lowered.contains("timeout") || lowered.contains("timed out") => {
            DatabaseError::ConnectionTimeout {
                message: format!("MongoDB connection timed out: {}", error.message),
                timeout_ms: None,
                source: Some(error),
            }
        }
        DriverErrorKind::Other => DatabaseError::Unclassified {
            message: format!("Unexpected database error: {}", error.message),
            source: Some(error),
        },
    }
}

fn is_tls_message(lowered: &str) -> bool {
    ["ssl", "tls", "certificate"]
        .iter()
        .any(|needle| lowered.contains(needle))
}

impl From<mongodb::error::Error> for DriverError {
    fn from(error: mongodb::error::Error) -> Self {
        let message = error.to_string();

        let (kind, code) = match error.kind.as_ref() {
            MongoErrorKind::ServerSelection { .. } => (DriverErrorKind::ServerSelection, None),
            MongoErrorKind::Authentication { .. } => (DriverErrorKind::Authentication, None),
            MongoErrorKind::InvalidTlsConfig { .. } => (DriverErrorKind::Tls, None),
            MongoErrorKind::DnsResolve { .. } => (DriverErrorKind::Dns, None),
            MongoErrorKind::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => {
                (DriverErrorKind::NetworkTimeout, None)
            }
            MongoErrorKind::Io(_) | MongoErrorKind::ConnectionPoolCleared { .. } => {
                (DriverErrorKind::ConnectionFailure, None)
            }
            MongoErrorKind::InvalidArgument { .. } => (DriverErrorKind::Configuration, None),
            MongoErrorKind::Write(_) => (DriverErrorKind::Write, None),
            MongoErrorKind::Transaction { .. } => (DriverErrorKind::Transaction, None),
            MongoErrorKind::Command(command) => (DriverErrorKind::Command, Some(command.code)),
            _ => (DriverErrorKind::Other, None),
        };

        let driver_error = DriverError::new(kind, message).with_source(error);
        match code {
            Some(code) => driver_error.with_code(code),
            None => driver_error,
        }
    }
}

impl From<DriverError> for DatabaseError {
    fn from(error: DriverError) -> Self {
        classify(error)
    }
}

impl From<mongodb::error::Error> for DatabaseError {
    fn from(error: mongodb::error::Error) -> Self {
        classify(DriverError::from(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorKind;

    fn classify_kind(kind: DriverErrorKind, message: &str) -> ErrorKind {
        classify(DriverError::new(kind, message)).kind()
    }

    #[test]
    fn test_server_selection() {
        assert_eq!(
            classify_kind(DriverErrorKind::ServerSelection, "no servers available"),
            ErrorKind::ServerSelectionFailed
        );
    }

    #[test]
    fn test_connection_failure_refined_by_message() {
        assert_eq!(
            classify_kind(DriverErrorKind::ConnectionFailure, "Auth handshake rejected"),
            ErrorKind::AuthenticationFailed
        );
        assert_eq!(
            classify_kind(
                DriverErrorKind::ConnectionFailure,
                "SSL: CERTIFICATE_VERIFY_FAILED"
            ),
            ErrorKind::TlsFailure
        );
        assert_eq!(
            classify_kind(DriverErrorKind::ConnectionFailure, "connection refused"),
            ErrorKind::ConnectionFailed
        );
    }

    #[test]
    fn test_structured_kinds_win_over_message() {
        // A timeout-sounding message on a write is still a write failure
        assert_eq!(
            classify_kind(DriverErrorKind::Write, "wtimeout exceeded"),
            ErrorKind::WriteFailed
        );
        assert_eq!(
            classify_kind(DriverErrorKind::Dns, "lookup timeout"),
            ErrorKind::NetworkFailure
        );
        assert_eq!(
            classify_kind(DriverErrorKind::NetworkTimeout, "socket"),
            ErrorKind::ConnectionTimeout
        );
    }

    #[test]
    fn test_command_auth_by_code_or_message() {
        let by_code = classify(
            DriverError::new(DriverErrorKind::Command, "bad credentials").with_code(18),
        );
        assert_eq!(by_code.kind(), ErrorKind::AuthenticationFailed);

        assert_eq!(
            classify_kind(DriverErrorKind::Command, "Authentication failed."),
            ErrorKind::AuthenticationFailed
        );
        assert_eq!(
            classify_kind(DriverErrorKind::Command, "ns not found"),
            ErrorKind::OperationFailed
        );
    }

    #[test]
    fn test_other_falls_through_and_preserves_source() {
        assert_eq!(
            classify_kind(DriverErrorKind::Other, "operation timed out"),
            ErrorKind::ConnectionTimeout
        );

        let err = classify(DriverError::new(DriverErrorKind::Other, "weird"));
        assert_eq!(err.kind(), ErrorKind::Unclassified);
        assert_eq!(err.driver_error().map(|d| d.message.as_str()), Some("weird"));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let make = || DriverError::new(DriverErrorKind::ConnectionFailure, "TLS alert");
        assert_eq!(classify(make()).kind(), classify(make()).kind());
    }

    #[test]
    fn test_configuration_carries_violation() {
        let err = classify(DriverError::new(
            DriverErrorKind::Configuration,
            "invalid port",
        ));
        match err {
            DatabaseError::InvalidConfiguration { violations, .. } => {
                assert_eq!(violations, vec!["invalid port".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
