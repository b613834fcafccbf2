//! Database layer for the EVPulse backend
//!
//! This library owns the MongoDB connection: configuration loaded from the
//! environment, a connection manager with state tracking, retry with exponential
//! backoff, a background health check loop, and a diagnostics battery for
//! localizing connectivity failures.
//!
//! # Examples
//!
//! ## Startup and shutdown
//!
//! ```ignore
//! use core_config::FromEnv;
//! use evpulse_database::{bootstrap, close_db, get_collection};
//! use evpulse_database::mongodb::MongoDbConfig;
//!
//! let manager = bootstrap(MongoDbConfig::from_env()?).await?;
//! let stations = get_collection::<Document>(&manager, "stations")?;
//! // ...
//! close_db(&manager).await;
//! ```
//!
//! ## Retrying an operation
//!
//! ```ignore
//! use evpulse_database::mongodb::with_db_retry;
//!
//! let count = with_db_retry(&manager, Some(5), None, || {
//!     let manager = manager.clone();
//!     async move {
//!         let stations = get_collection::<Document>(&manager, "stations")?;
//!         Ok(stations.count_documents(doc! {}).await?)
//!     }
//! })
//! .await?;
//! ```
//!
//! ## Diagnostics
//!
//! ```ignore
//! use evpulse_database::run_diagnostics;
//!
//! let report = run_diagnostics(None, Some("evpulse")).await?;
//! println!("{report}");
//! ```

pub mod common;
pub mod mongodb;

pub use common::{DatabaseError, DatabaseResult, ErrorKind};
pub use crate::mongodb::diagnostics::{quick_test, run_diagnostics};

use crate::mongodb::{Collection, ConnectionManager, Database, Driver, MongoDbConfig};
use tracing::{error, info, warn};

/// Connect `manager` with the health check loop enabled and hand back a handle.
///
/// Calling it again while connected and without a config is a no-op.
pub async fn init_db<D: Driver>(
    manager: &ConnectionManager<D>,
    config: Option<MongoDbConfig>,
) -> DatabaseResult<ConnectionManager<D>> {
    manager.connect(config, true).await?;
    Ok(manager.clone())
}

/// Database handle; not-initialized before [`init_db`]
pub fn get_db<D: Driver>(manager: &ConnectionManager<D>) -> DatabaseResult<D::Database> {
    manager.db()
}

pub fn get_collection<T: Send + Sync>(
    manager: &ConnectionManager,
    name: &str,
) -> DatabaseResult<Collection<T>> {
    manager.get_collection(name)
}

/// Stop the health check loop and close the client
pub async fn close_db<D: Driver>(manager: &ConnectionManager<D>) {
    manager.disconnect().await;
}

/// Application start-up sequence.
///
/// An invalid configuration aborts start-up with every violation logged, before
/// any network I/O. Otherwise a quick connection is tried; when that fails the
/// full diagnostics run and start-up aborts unless every check passes.
/// Otherwise the manager is connected and the target database's collections logged.
pub async fn bootstrap(config: MongoDbConfig) -> DatabaseResult<ConnectionManager> {
    info!(config = %config, "Initializing database");

    if let Err(violations) = config.validate() {
        for violation in &violations {
            error!(violation = %violation, "Database configuration issue");
        }
        return Err(DatabaseError::invalid_configuration(violations));
    }

    if !quick_test(Some(&config.uri)).await {
        warn!("Quick connection test failed, running full diagnostics");

        let report = run_diagnostics(Some(&config.uri), Some(&config.database)).await?;
        if !report.all_passed {
            error!("Database diagnostics failed\n{}", report);
            return Err(DatabaseError::ConnectionFailed {
                message: format!(
                    "Database diagnostics failed: {}/{} checks passed",
                    report.passed, report.total_tests
                ),
                source: None,
            });
        }
    }

    let manager = ConnectionManager::mongo();
    init_db(&manager, Some(config)).await?;
    log_collections(&manager).await;
    Ok(manager)
}

async fn log_collections(manager: &ConnectionManager) {
    let Ok(db) = get_db(manager) else {
        return;
    };
    match list_collections(&db).await {
        Ok(collections) => info!(
            database = %db.name(),
            count = collections.len(),
            collections = ?collections,
            "Connected to database"
        ),
        Err(e) => warn!(error = %e, "Could not list collections"),
    }
}

async fn list_collections(db: &Database) -> DatabaseResult<Vec<String>> {
    Ok(db.list_collection_names().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mongodb::fake::FakeDriver;
    use crate::mongodb::ConnectionState;

    fn config() -> MongoDbConfig {
        MongoDbConfig::new("mongodb://fake:27017").with_tls(false)
    }

    #[tokio::test]
    async fn test_get_db_before_init() {
        let manager = ConnectionManager::new(FakeDriver::default());
        let err = get_db(&manager).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotInitialized);
    }

    #[tokio::test]
    async fn test_init_db_is_idempotent() {
        let driver = FakeDriver::default();
        let manager = ConnectionManager::new(driver.clone());

        let handle = init_db(&manager, Some(config())).await.unwrap();
        assert!(handle.is_connected());
        init_db(&manager, None).await.unwrap();
        assert_eq!(driver.open_count(), 1);

        assert_eq!(get_db(&handle).unwrap().name, "evpulse");

        close_db(&manager).await;
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert!(get_db(&handle).is_err());
    }

    #[tokio::test]
    async fn test_get_collection_before_init() {
        let manager = ConnectionManager::mongo();
        let err = get_collection::<::mongodb::bson::Document>(&manager, "stations").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotInitialized);
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_invalid_config_without_connecting() {
        // Port 1 is never listening: reaching the network would fail differently
        let config = MongoDbConfig::new("mongodb://127.0.0.1:1")
            .with_tls(false)
            .with_pool_size(10, 5);

        let err = tokio::time::timeout(std::time::Duration::from_secs(2), bootstrap(config))
            .await
            .expect("bootstrap returns without network diagnostics")
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
        assert!(!err.is_service_unavailable());
        match err {
            DatabaseError::InvalidConfiguration { violations, .. } => {
                assert_eq!(violations.len(), 1);
                assert!(violations[0].contains("pool"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_empty_uri() {
        let err = bootstrap(MongoDbConfig::new("")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
    }
}
