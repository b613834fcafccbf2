use super::state::ConnectionState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-lifetime counters; reconnecting does not reset them
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub connections_made: AtomicU64,
    pub connection_failures: AtomicU64,
    pub reconnections: AtomicU64,
    pub queries_executed: AtomicU64,
    pub health_check_failures: AtomicU64,
    last_health_check: RwLock<Option<DateTime<Utc>>>,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_health_check(&self, at: DateTime<Utc>) {
        let mut last = self
            .last_health_check
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = Some(at);
    }

    pub fn snapshot(
        &self,
        state: ConnectionState,
        connection_time: Option<DateTime<Utc>>,
    ) -> ConnectionStats {
        let last_health_check = *self
            .last_health_check
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let uptime_seconds = connection_time
            .map(|since| (Utc::now() - since).num_milliseconds().max(0) as f64 / 1000.0)
            .unwrap_or(0.0);

        ConnectionStats {
            connections_made: self.connections_made.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
            reconnections: self.reconnections.load(Ordering::Relaxed),
            queries_executed: self.queries_executed.load(Ordering::Relaxed),
            health_check_failures: self.health_check_failures.load(Ordering::Relaxed),
            last_health_check,
            state,
            connection_time,
            uptime_seconds,
        }
    }
}

/// Point-in-time view of the manager's statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStats {
    pub connections_made: u64,
    pub connection_failures: u64,
    pub reconnections: u64,
    pub queries_executed: u64,
    pub health_check_failures: u64,
    pub last_health_check: Option<DateTime<Utc>>,
    pub state: ConnectionState,
    pub connection_time: Option<DateTime<Utc>>,
    pub uptime_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_snapshot_uptime() {
        let counters = Counters::default();
        Counters::bump(&counters.connections_made);

        let since = Utc::now() - Duration::seconds(90);
        let stats = counters.snapshot(ConnectionState::Connected, Some(since));
        assert_eq!(stats.connections_made, 1);
        assert!(stats.uptime_seconds >= 90.0);

        let idle = counters.snapshot(ConnectionState::Disconnected, None);
        assert_eq!(idle.uptime_seconds, 0.0);
        assert!(idle.last_health_check.is_none());
    }

    #[test]
    fn test_last_health_check_recorded() {
        let counters = Counters::default();
        let now = Utc::now();
        counters.record_health_check(now);
        assert_eq!(
            counters
                .snapshot(ConnectionState::Connected, None)
                .last_health_check,
            Some(now)
        );
    }
}
