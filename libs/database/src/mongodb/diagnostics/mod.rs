//! Connectivity diagnostics.
//!
//! A fixed battery of checks walks from the local environment through URI
//! parsing, DNS, TCP reachability and TLS up to an authenticated CRUD round-trip,
//! so a failing connection can be pinned to one layer. Every check runs even when
//! an earlier one failed; failures carry remediation suggestions.
//!
//! ```ignore
//! let report = run_diagnostics(None, None).await?;
//! if !report.all_passed {
//!     eprintln!("{report}");
//! }
//! ```

mod checks;
mod report;

pub use checks::{Check, DIAGNOSTIC_COLLECTION};
pub use report::{DiagnosticReport, DiagnosticResult};

use crate::common::{DatabaseError, DatabaseResult};
use checks::Probe;
use core_config::env_or_default;
use std::time::Duration;
use strum::IntoEnumIterator;
use tokio::time::Instant;
use tracing::{info, warn};

pub const DEFAULT_DATABASE: &str = "evpulse";

/// Time limits applied by the checks that touch the network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticTimeouts {
    pub server_selection: Duration,
    pub connect: Duration,
    /// Per-host TCP connect in the network check
    pub tcp: Duration,
}

impl Default for DiagnosticTimeouts {
    fn default() -> Self {
        Self {
            server_selection: Duration::from_secs(10),
            connect: Duration::from_secs(10),
            tcp: Duration::from_secs(5),
        }
    }
}

impl DiagnosticTimeouts {
    /// Limits used by [`quick_test`]
    pub fn quick() -> Self {
        Self::uniform(Duration::from_secs(5))
    }

    pub fn uniform(limit: Duration) -> Self {
        Self {
            server_selection: limit,
            connect: limit,
            tcp: limit,
        }
    }
}

/// One diagnostics run against a connection string
#[derive(Clone)]
pub struct Diagnostics {
    uri: String,
    database: String,
    timeouts: DiagnosticTimeouts,
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics")
            .field("uri", &crate::mongodb::mask_uri(&self.uri))
            .field("database", &self.database)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl Diagnostics {
    pub fn new(uri: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            database: database.into(),
            timeouts: DiagnosticTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: DiagnosticTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Run every check in order and aggregate the results
    pub async fn run(&self) -> DiagnosticReport {
        info!(
            uri = %crate::mongodb::mask_uri(&self.uri),
            database = %self.database,
            "Running MongoDB connection diagnostics"
        );

        let mut probe = Probe::new(&self.uri, &self.database, &self.timeouts);
        let mut results = Vec::new();

        for check in Check::iter() {
            let started = Instant::now();
            let result = check
                .run(&mut probe)
                .await
                .timed(started.elapsed().as_secs_f64() * 1000.0);

            if result.passed {
                info!(check = %check, duration_ms = result.duration_ms, "{}", result);
            } else {
                warn!(
                    check = %check,
                    duration_ms = result.duration_ms,
                    error = ?result.error,
                    "{}",
                    result
                );
            }
            results.push(result);
        }

        let report = DiagnosticReport::from_results(results);
        info!(
            passed = report.passed,
            total = report.total_tests,
            success_rate = %report.success_rate,
            "Diagnostics finished"
        );
        report
    }
}

fn uri_or_env(uri: Option<&str>) -> String {
    match uri {
        Some(uri) => uri.to_string(),
        None => env_or_default("MONGODB_URI", ""),
    }
}

/// Run the full diagnostics battery.
///
/// `uri` defaults to `MONGODB_URI` and `database` to `evpulse`. A missing URI is
/// reported as invalid configuration rather than as a failed run.
pub async fn run_diagnostics(
    uri: Option<&str>,
    database: Option<&str>,
) -> DatabaseResult<DiagnosticReport> {
    let uri = uri_or_env(uri);
    if uri.is_empty() {
        return Err(DatabaseError::invalid_configuration(vec![
            "No MongoDB URI provided: set MONGODB_URI or pass a URI".to_string(),
        ]));
    }

    let diagnostics = Diagnostics::new(uri, database.unwrap_or(DEFAULT_DATABASE));
    Ok(diagnostics.run().await)
}

/// Single connect-and-ping with short timeouts. Never fails, only answers.
///
/// TLS is forced on with certificate checks relaxed when the connection string
/// asks for TLS.
pub async fn quick_test(uri: Option<&str>) -> bool {
    quick_test_with(uri, DiagnosticTimeouts::quick()).await
}

pub async fn quick_test_with(uri: Option<&str>, timeouts: DiagnosticTimeouts) -> bool {
    let uri = uri_or_env(uri);
    if uri.is_empty() {
        return false;
    }

    let relaxed_tls = crate::mongodb::MongoUri::parse(&uri)
        .map(|parsed| parsed.implies_tls())
        .unwrap_or(true);

    match checks::connect_and_ping(&uri, &timeouts, relaxed_tls).await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Quick connection test failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorKind;

    const UNREACHABLE: &str = "mongodb://127.0.0.1:1/?serverSelectionTimeoutMS=500";

    fn fast() -> DiagnosticTimeouts {
        DiagnosticTimeouts::uniform(Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_run_diagnostics_requires_uri() {
        let result = temp_env::async_with_vars([("MONGODB_URI", None::<&str>)], async {
            run_diagnostics(None, None).await
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
    }

    #[tokio::test]
    async fn test_quick_test_without_uri_is_false() {
        let ok = temp_env::async_with_vars([("MONGODB_URI", None::<&str>)], async {
            quick_test(None).await
        })
        .await;
        assert!(!ok);
        assert!(!quick_test(Some("")).await);
    }

    #[tokio::test]
    async fn test_quick_test_unreachable_is_false() {
        assert!(!quick_test_with(Some(UNREACHABLE), fast()).await);
        assert!(!quick_test_with(Some("definitely not a uri"), fast()).await);
    }

    #[tokio::test]
    async fn test_unreachable_host_report() {
        let report = Diagnostics::new(UNREACHABLE, "evpulse")
            .with_timeouts(fast())
            .run()
            .await;

        assert_eq!(report.total_tests, 10);
        assert!(!report.all_passed);
        assert_eq!(report.results[0].name, "Environment Check");

        let network = &report.results[3];
        assert_eq!(network.name, "Network Connectivity");
        assert!(!network.passed);

        // later checks still ran
        assert!(!report.results[6].passed);
        assert!(!report.results[9].passed);
        assert!(!report.suggestions.is_empty());
        assert!(report
            .suggestions
            .contains(&"Check if firewall is blocking port 27017".to_string()));
    }

    #[tokio::test]
    async fn test_bad_scheme_report() {
        let report = Diagnostics::new("redis://localhost:6379", "evpulse")
            .with_timeouts(fast())
            .run()
            .await;

        assert!(!report.all_passed);
        assert!(!report.results[1].passed);
        assert_eq!(report.results[2].message, "Could not extract hostname from URI");
        assert_eq!(
            report.suggestions[0],
            "Check your MONGODB_URI environment variable"
        );
    }

    #[test]
    fn test_debug_masks_uri() {
        let diagnostics = Diagnostics::new("mongodb://admin:hunter2@db:27017", "evpulse");
        let debug = format!("{:?}", diagnostics);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("****"));
    }
}
