//! Connection manager: owns the live client, the connection state machine,
//! reconnect/backoff logic and the background health check loop.
//!
//! ```text
//! disconnected -> connecting -> connected
//! connected -> reconnecting -> connecting -> connected   (failed probe)
//! any -> error                                           (unrecoverable failure)
//! error -> connecting                                    (explicit reconnect)
//! ```
//!
//! `connect`, `disconnect` and `reconnect` are serialized by one async lock.
//! Reads (`state`, `db`, `health_check`, `execute_with_retry`) never wait on it
//! and may observe a slightly stale state.

use super::config::MongoDbConfig;
use super::driver::{Driver, MongoDriver};
use super::health::{DatabaseStatus, HealthReport};
use super::monitor::Monitor;
use super::state::{ConnectionState, StateChange};
use super::stats::{ConnectionStats, Counters};
use crate::common::{
    DatabaseError, DatabaseResult, ErrorKind, RetryPolicy, classify, retry_with_backoff,
    retry_with_backoff_hook,
};
use chrono::{DateTime, Utc};
use core_config::FromEnv;
use futures::future::BoxFuture;
use mongodb::{ClientSession, Collection};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Probe timeout used before any config has been applied
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 30_000;
const EVENT_CAPACITY: usize = 64;

/// Tuning for the manager itself (as opposed to the connection)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerOptions {
    pub health_check_interval: Duration,
    /// How long `disconnect` waits for the health check loop to stop
    pub shutdown_timeout: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

struct Live<D: Driver> {
    state: ConnectionState,
    client: Option<D::Client>,
    database: Option<D::Database>,
    config: Option<MongoDbConfig>,
    connected_at: Option<DateTime<Utc>>,
    auto_health_check: bool,
}

impl<D: Driver> Live<D> {
    fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            client: None,
            database: None,
            config: None,
            connected_at: None,
            auto_health_check: false,
        }
    }
}

pub(crate) struct Shared<D: Driver> {
    driver: D,
    options: ManagerOptions,
    lifecycle: tokio::sync::Mutex<()>,
    live: RwLock<Live<D>>,
    counters: Counters,
    events: broadcast::Sender<StateChange>,
    monitor: Mutex<Option<Monitor>>,
}

/// Handle to a database connection shared by the whole process.
///
/// Cloning is cheap and every clone drives the same connection: construct one at
/// startup and pass it to whoever needs the database.
///
/// # Example
///
/// ```ignore
/// use evpulse_database::mongodb::{ConnectionManager, MongoDbConfig};
///
/// let manager = ConnectionManager::mongo();
/// manager.connect(Some(MongoDbConfig::new(uri)), true).await?;
///
/// let count = manager
///     .execute_with_retry(|| {
///         let manager = manager.clone();
///         async move {
///             let stations = manager.get_collection::<Document>("stations")?;
///             Ok(stations.count_documents(doc! {}).await?)
///         }
///     })
///     .await?;
///
/// manager.disconnect().await;
/// ```
pub struct ConnectionManager<D: Driver = MongoDriver> {
    shared: Arc<Shared<D>>,
}

impl<D: Driver> Clone for ConnectionManager<D> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<D: Driver> fmt::Debug for ConnectionManager<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("config", &self.config())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager<MongoDriver> {
    /// Manager backed by the official MongoDB driver
    pub fn mongo() -> Self {
        Self::new(MongoDriver)
    }
}

impl Default for ConnectionManager<MongoDriver> {
    fn default() -> Self {
        Self::mongo()
    }
}

impl<D: Driver> ConnectionManager<D> {
    pub fn new(driver: D) -> Self {
        Self::with_options(driver, ManagerOptions::default())
    }

    pub fn with_options(driver: D, options: ManagerOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                driver,
                options,
                lifecycle: tokio::sync::Mutex::new(()),
                live: RwLock::new(Live::new()),
                counters: Counters::default(),
                events,
                monitor: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn from_shared(shared: Arc<Shared<D>>) -> Self {
        Self { shared }
    }

    fn downgrade(&self) -> Weak<Shared<D>> {
        Arc::downgrade(&self.shared)
    }

    fn live(&self) -> RwLockReadGuard<'_, Live<D>> {
        self.shared
            .live
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn live_mut(&self) -> RwLockWriteGuard<'_, Live<D>> {
        self.shared
            .live
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ConnectionState {
        self.live().state
    }

    pub fn is_connected(&self) -> bool {
        let live = self.live();
        live.state == ConnectionState::Connected && live.client.is_some()
    }

    /// Database handle; fetch it per operation rather than caching it
    pub fn db(&self) -> DatabaseResult<D::Database> {
        self.live()
            .database
            .clone()
            .ok_or_else(DatabaseError::not_initialized)
    }

    pub fn client(&self) -> DatabaseResult<D::Client> {
        self.live()
            .client
            .clone()
            .ok_or_else(DatabaseError::not_initialized)
    }

    /// The configuration of the last connect attempt that passed validation
    pub fn config(&self) -> Option<MongoDbConfig> {
        self.live().config.clone()
    }

    /// Receive every state transition from now on
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.shared.events.subscribe()
    }

    pub fn stats(&self) -> ConnectionStats {
        let (state, connected_at) = {
            let live = self.live();
            (live.state, live.connected_at)
        };
        self.shared.counters.snapshot(state, connected_at)
    }

    /// Stats plus a fresh probe when connected
    pub async fn status(&self) -> DatabaseStatus {
        let connected = self.is_connected();
        let health = if connected {
            Some(self.health_check().await)
        } else {
            None
        };

        DatabaseStatus {
            connected,
            state: self.state(),
            stats: self.stats(),
            health,
        }
    }

    /// Backoff schedule taken from the current config, defaults otherwise
    pub fn retry_policy(&self) -> RetryPolicy {
        match &self.live().config {
            Some(config) => RetryPolicy::new()
                .with_max_attempts(config.max_retry_attempts)
                .with_initial_delay(config.retry_delay_seconds)
                .with_backoff_multiplier(config.retry_backoff_multiplier)
                .with_attempt_logging(config.log_queries),
            None => RetryPolicy::new(),
        }
    }

    /// Apply `update` and move to `to` under one write lock, then publish the change
    fn transition(&self, to: ConnectionState, update: impl FnOnce(&mut Live<D>)) {
        let (from, verbose) = {
            let mut live = self.live_mut();
            update(&mut live);
            let from = live.state;
            live.state = to;
            (from, live.config.as_ref().is_some_and(|c| c.debug_mode))
        };

        if from == to {
            return;
        }
        if verbose {
            info!(%from, %to, "Connection state changed");
        } else {
            debug!(%from, %to, "Connection state changed");
        }
        // No subscribers is fine
        let _ = self.shared.events.send(StateChange { from, to });
    }

    /// Connect using `config`, or the stored config, or the environment.
    ///
    /// A no-op when already connected and no new config is given. Validation runs
    /// before any network I/O. With `auto_health_check` the background loop is
    /// started once connected.
    pub async fn connect(
        &self,
        config: Option<MongoDbConfig>,
        auto_health_check: bool,
    ) -> DatabaseResult<()> {
        let _guard = self.shared.lifecycle.lock().await;
        self.connect_locked(config, auto_health_check).await
    }

    async fn connect_locked(
        &self,
        config: Option<MongoDbConfig>,
        auto_health_check: bool,
    ) -> DatabaseResult<()> {
        if config.is_none() && self.is_connected() {
            debug!("Already connected to database");
            return Ok(());
        }

        let config = match config.or_else(|| self.config()) {
            Some(config) => config,
            None => MongoDbConfig::from_env()
                .map_err(|e| DatabaseError::invalid_configuration(vec![e.to_string()]))?,
        };

        if let Err(violations) = config.validate() {
            for violation in &violations {
                warn!(violation = %violation, "Invalid database configuration");
            }
            return Err(DatabaseError::invalid_configuration(violations));
        }

        // A loop started by an earlier connect must not outlive a connect without one
        if !auto_health_check {
            self.stop_monitor().await;
        }

        let mut previous = None;
        self.transition(ConnectionState::Connecting, |live| {
            live.config = Some(config.clone());
            live.auto_health_check = auto_health_check;
            previous = live.client.take();
            live.database = None;
        });
        info!(config = %config, "Connecting to MongoDB");

        if let Some(client) = previous {
            self.close_quietly(client).await;
        }

        match self.open_and_probe(&config).await {
            Ok(client) => {
                let database = self.shared.driver.database(&client, &config.database);
                Counters::bump(&self.shared.counters.connections_made);
                self.transition(ConnectionState::Connected, |live| {
                    live.client = Some(client);
                    live.database = Some(database);
                    live.connected_at = Some(Utc::now());
                });
                info!(database = %config.database, "Successfully connected to MongoDB");

                if auto_health_check {
                    self.start_monitor();
                }
                Ok(())
            }
            Err(error) => {
                Counters::bump(&self.shared.counters.connection_failures);
                self.transition(ConnectionState::Error, |live| {
                    live.client = None;
                    live.database = None;
                    live.connected_at = None;
                });
                error!(error = %error, code = error.code(), "Failed to connect to MongoDB");
                Err(error)
            }
        }
    }

    /// Open a client and ping it within the server selection timeout
    async fn open_and_probe(&self, config: &MongoDbConfig) -> DatabaseResult<D::Client> {
        let driver = &self.shared.driver;
        let client = driver.open(config).await.map_err(classify)?;

        let timeout_ms = config.server_selection_timeout_ms;
        let probe =
            tokio::time::timeout(Duration::from_millis(timeout_ms), driver.ping(&client)).await;

        match probe {
            Ok(Ok(())) => Ok(client),
            Ok(Err(e)) => {
                self.close_quietly(client).await;
                Err(classify(e))
            }
            Err(_) => {
                self.close_quietly(client).await;
                Err(DatabaseError::connection_timeout(timeout_ms, None))
            }
        }
    }

    async fn close_quietly(&self, client: D::Client) {
        if let Err(e) = self.shared.driver.close(client).await {
            warn!(error = %e, "Error closing MongoDB client");
        }
    }

    /// Stop the health check loop, close the client and go back to `disconnected`.
    ///
    /// Idempotent, and close errors are only logged.
    pub async fn disconnect(&self) {
        // Stop first so a reconnect running inside the loop releases the lock
        self.signal_monitor_stop();
        let _guard = self.shared.lifecycle.lock().await;
        info!("Disconnecting from MongoDB");

        self.stop_monitor().await;

        let mut client = None;
        self.transition(ConnectionState::Disconnected, |live| {
            client = live.client.take();
            live.database = None;
            live.connected_at = None;
        });

        if let Some(client) = client {
            self.close_quietly(client).await;
        }
        info!("Disconnected from MongoDB");
    }

    /// Drop the current client and connect again with the stored config,
    /// following the configured backoff schedule.
    ///
    /// Fails with [`DatabaseError::RetryExhausted`] once every attempt failed.
    pub async fn reconnect(&self) -> DatabaseResult<()> {
        let _guard = self.shared.lifecycle.lock().await;
        self.reconnect_locked().await
    }

    async fn reconnect_locked(&self) -> DatabaseResult<()> {
        let mut previous = None;
        self.transition(ConnectionState::Reconnecting, |live| {
            previous = live.client.take();
            live.database = None;
            live.connected_at = None;
        });
        Counters::bump(&self.shared.counters.reconnections);
        info!("Attempting to reconnect to MongoDB");

        if let Some(client) = previous {
            self.close_quietly(client).await;
        }

        let (config, auto_health_check) = {
            let live = self.live();
            (live.config.clone(), live.auto_health_check)
        };
        let policy = self.retry_policy().retry_all();

        let result = retry_with_backoff(
            &policy,
            "Failed to reconnect after multiple attempts",
            |_| {
                let config = config.clone();
                async move { self.connect_locked(config, auto_health_check).await }
            },
        )
        .await;

        if let Err(error) = &result {
            self.transition(ConnectionState::Error, |_| {});
            error!(error = %error, "Giving up on reconnecting to MongoDB");
        }
        result
    }

    /// Reconnect unless another caller already restored the connection while
    /// this one waited for the lifecycle lock
    async fn reconnect_if_disconnected(&self) -> DatabaseResult<()> {
        let _guard = self.shared.lifecycle.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        self.reconnect_locked().await
    }

    /// Ping the live client. Never fails: problems are reported in the result.
    pub async fn health_check(&self) -> HealthReport {
        let (client, state, timeout_ms) = {
            let live = self.live();
            let timeout_ms = live
                .config
                .as_ref()
                .map_or(DEFAULT_PROBE_TIMEOUT_MS, |c| c.socket_timeout_ms);
            (live.client.clone(), live.state, timeout_ms)
        };
        let timestamp = Utc::now();

        let Some(client) = client else {
            return HealthReport::unhealthy(timestamp, state, "No client connection");
        };

        let started = Instant::now();
        let probe = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.shared.driver.ping(&client),
        )
        .await;

        match probe {
            Ok(Ok(())) => {
                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                self.shared.counters.record_health_check(Utc::now());
                HealthReport::healthy(timestamp, state, latency_ms)
            }
            Ok(Err(e)) => self.health_check_failed(timestamp, state, e.to_string()),
            Err(_) => self.health_check_failed(
                timestamp,
                state,
                format!("Health check timed out after {}ms", timeout_ms),
            ),
        }
    }

    fn health_check_failed(
        &self,
        timestamp: DateTime<Utc>,
        state: ConnectionState,
        error: String,
    ) -> HealthReport {
        Counters::bump(&self.shared.counters.health_check_failures);
        warn!(error = %error, "Health check failed");
        HealthReport::unhealthy(timestamp, state, error)
    }

    /// Run `operation` under the configured retry policy.
    ///
    /// `operation` is called again only after the reconnect preceding a retry,
    /// so handles fetched when it is called are current. Do not hold on to a
    /// handle across calls.
    pub async fn execute_with_retry<F, Fut, T>(&self, operation: F) -> DatabaseResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DatabaseResult<T>>,
    {
        self.execute_with_policy(self.retry_policy(), operation).await
    }

    /// Run `operation` under `policy` (at least one attempt).
    ///
    /// Before each retry the manager reconnects if it is no longer connected; a
    /// failed reconnect is only logged and the retry goes ahead.
    pub async fn execute_with_policy<F, Fut, T>(
        &self,
        policy: RetryPolicy,
        mut operation: F,
    ) -> DatabaseResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DatabaseResult<T>>,
    {
        let policy = RetryPolicy {
            max_attempts: policy.max_attempts.max(1),
            ..policy
        };

        let value = retry_with_backoff_hook(
            &policy,
            "Database operation failed after retries",
            |_| async move {
                if self.is_connected() {
                    return;
                }
                if let Err(e) = self.reconnect_if_disconnected().await {
                    debug!(error = %e, "Reconnect before retry failed");
                }
            },
            |_| operation(),
        )
        .await?;

        Counters::bump(&self.shared.counters.queries_executed);
        Ok(value)
    }

    fn start_monitor(&self) {
        let mut slot = self
            .shared
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // A reconnect from inside the loop lands here while the loop is still running
        if slot.as_ref().is_some_and(|monitor| !monitor.is_finished()) {
            return;
        }

        *slot = Some(Monitor::spawn(
            self.downgrade(),
            self.shared.options.health_check_interval,
        ));
        debug!("Started health check loop");
    }

    fn signal_monitor_stop(&self) {
        let slot = self
            .shared
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(monitor) = slot.as_ref() {
            monitor.signal_stop();
        }
    }

    async fn stop_monitor(&self) {
        let monitor = self
            .shared
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(monitor) = monitor {
            monitor.shutdown(self.shared.options.shutdown_timeout).await;
        }
    }
}

impl ConnectionManager<MongoDriver> {
    /// Typed collection from the connected database
    pub fn get_collection<T: Send + Sync>(&self, name: &str) -> DatabaseResult<Collection<T>> {
        Ok(self.db()?.collection::<T>(name))
    }

    /// Run `body` inside a multi-document transaction.
    ///
    /// Commits when `body` succeeds and aborts when it fails. Needs a replica set.
    ///
    /// ```ignore
    /// manager
    ///     .transaction(|session| {
    ///         Box::pin(async move {
    ///             bookings.insert_one(booking).session(&mut *session).await?;
    ///             stations.update_one(filter, update).session(&mut *session).await?;
    ///             Ok(())
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn transaction<F, T>(&self, body: F) -> DatabaseResult<T>
    where
        F: for<'s> FnOnce(&'s mut ClientSession) -> BoxFuture<'s, DatabaseResult<T>>,
    {
        let client = self.client()?;

        let mut session = client
            .start_session()
            .await
            .map_err(|e| DatabaseError::transaction(e.into()))?;
        session
            .start_transaction()
            .await
            .map_err(|e| DatabaseError::transaction(e.into()))?;

        match body(&mut session).await {
            Ok(value) => {
                session
                    .commit_transaction()
                    .await
                    .map_err(|e| DatabaseError::transaction(e.into()))?;
                Ok(value)
            }
            Err(error) => {
                if let Err(abort) = session.abort_transaction().await {
                    warn!(error = %abort, "Failed to abort transaction");
                }
                Err(error)
            }
        }
    }
}

/// Run `operation` with the manager's retry policy, optionally overriding the
/// attempt count and the retryable kinds.
pub async fn with_db_retry<D, F, Fut, T>(
    manager: &ConnectionManager<D>,
    max_retries: Option<u32>,
    retry_on: Option<Vec<ErrorKind>>,
    operation: F,
) -> DatabaseResult<T>
where
    D: Driver,
    F: FnMut() -> Fut,
    Fut: Future<Output = DatabaseResult<T>>,
{
    let mut policy = manager.retry_policy();
    if let Some(max_retries) = max_retries {
        policy.max_attempts = max_retries;
    }
    if let Some(kinds) = retry_on {
        policy.retry_on = Some(kinds);
    }
    manager.execute_with_policy(policy, operation).await
}
