//! Error taxonomy, classification and retry policy shared by the database layer

pub mod classify;
pub mod error;
pub mod retry;

pub use classify::classify;
pub use error::{
    DatabaseError, DatabaseResult, DriverError, DriverErrorKind, ErrorBody, ErrorKind,
};
pub use retry::{DEFAULT_RETRYABLE, RetryPolicy, retry_with_backoff, retry_with_backoff_hook};
