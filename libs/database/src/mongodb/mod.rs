//! MongoDB connection management and diagnostics
//!
//! Provides the configuration model, the connection manager with its health
//! check loop, and the connectivity diagnostics battery.

mod config;
mod driver;
mod health;
mod manager;
mod monitor;
mod state;
mod stats;
mod uri;

pub mod diagnostics;

#[cfg(test)]
pub(crate) mod fake;

pub use config::{
    ConnectionOptions, KNOWN_COMPRESSORS, MongoDbConfig, ReadPreferenceMode, TlsSettings,
    WriteConcernOptions,
};
pub use diagnostics::{DiagnosticReport, DiagnosticResult, quick_test, run_diagnostics};
pub use driver::{Driver, MongoDriver, apply_options};
pub use health::{DatabaseStatus, HealthReport};
pub use manager::{
    ConnectionManager, DEFAULT_HEALTH_CHECK_INTERVAL, DEFAULT_SHUTDOWN_TIMEOUT, ManagerOptions,
    with_db_retry,
};
pub use state::{ConnectionState, StateChange};
pub use stats::ConnectionStats;
pub use uri::{HostAddress, MongoUri, mask_uri};

// Re-export MongoDB types for convenience
pub use mongodb::{Client, Collection, Database};
