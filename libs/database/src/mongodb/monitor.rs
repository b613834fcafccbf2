use super::driver::Driver;
use super::manager::{ConnectionManager, Shared};
use super::state::ConnectionState;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Handle to the background health check task
pub(crate) struct Monitor {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Monitor {
    /// Spawn the loop. It holds only a weak reference, so dropping the last
    /// manager handle ends it as well.
    pub fn spawn<D: Driver>(shared: Weak<Shared<D>>, interval: Duration) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run(shared, stop_rx, interval));
        Self { stop, handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn signal_stop(&self) {
        let _ = self.stop.send(true);
    }

    /// Signal the loop and wait up to `timeout` for it, aborting it past that
    pub async fn shutdown(self, timeout: Duration) {
        let Monitor { stop, mut handle } = self;
        let _ = stop.send(true);

        if tokio::time::timeout(timeout, &mut handle).await.is_err() {
            warn!(
                timeout_secs = timeout.as_secs(),
                "Health check loop did not stop in time, aborting"
            );
            handle.abort();
        }
    }
}

/// Probe every `interval`; reconnect when a probe fails while connected.
///
/// Every await is raced against the stop signal, so a stop request never waits
/// for a sleep, a probe or a reconnect in progress.
async fn run<D: Driver>(
    shared: Weak<Shared<D>>,
    mut stop: watch::Receiver<bool>,
    interval: Duration,
) {
    debug!(interval_secs = interval.as_secs(), "Health check loop started");

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let Some(shared) = shared.upgrade() else {
            break;
        };
        let manager = ConnectionManager::from_shared(shared);

        let report = tokio::select! {
            _ = stop.changed() => break,
            report = manager.health_check() => report,
        };

        if !report.healthy && manager.state() == ConnectionState::Connected {
            warn!(error = ?report.error, "Health check failed, attempting reconnection");

            tokio::select! {
                _ = stop.changed() => break,
                result = manager.reconnect() => {
                    if let Err(e) = result {
                        error!(error = %e, "Reconnection failed");
                    }
                }
            }
        }
    }

    debug!("Health check loop stopped");
}
