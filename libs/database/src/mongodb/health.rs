use super::state::ConnectionState;
use super::stats::ConnectionStats;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of a single liveness probe
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub timestamp: DateTime<Utc>,
    /// State observed when the probe started
    pub state: ConnectionState,
    pub healthy: bool,
    /// Round-trip time in milliseconds, only present when healthy
    pub latency_ms: Option<f64>,
    pub error: Option<String>,
}

impl HealthReport {
    pub(crate) fn healthy(
        timestamp: DateTime<Utc>,
        state: ConnectionState,
        latency_ms: f64,
    ) -> Self {
        Self {
            timestamp,
            state,
            healthy: true,
            latency_ms: Some((latency_ms * 100.0).round() / 100.0),
            error: None,
        }
    }

    pub(crate) fn unhealthy(
        timestamp: DateTime<Utc>,
        state: ConnectionState,
        error: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            state,
            healthy: false,
            latency_ms: None,
            error: Some(error.into()),
        }
    }
}

/// Connection overview served by status endpoints
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStatus {
    pub connected: bool,
    pub state: ConnectionState,
    pub stats: ConnectionStats,
    /// Probed only while connected
    pub health: Option<HealthReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_rounded_to_two_decimals() {
        let report = HealthReport::healthy(Utc::now(), ConnectionState::Connected, 1.23456);
        assert_eq!(report.latency_ms, Some(1.23));
        assert!(report.error.is_none());
    }

    #[test]
    fn test_unhealthy_has_no_latency() {
        let report =
            HealthReport::unhealthy(Utc::now(), ConnectionState::Connected, "connection reset");
        assert!(!report.healthy);
        assert!(report.latency_ms.is_none());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["error"], "connection reset");
        assert_eq!(json["state"], "connected");
    }
}
