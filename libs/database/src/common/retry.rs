use super::error::{DatabaseError, DatabaseResult, ErrorKind};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Error kinds retried by default: the transient, connection-class failures
pub const DEFAULT_RETRYABLE: [ErrorKind; 4] = [
    ErrorKind::ConnectionFailed,
    ErrorKind::ConnectionTimeout,
    ErrorKind::ServerSelectionFailed,
    ErrorKind::NetworkFailure,
];

/// Retry policy with multiplicative backoff.
///
/// The delay before retry `n` (0-based) is `initial_delay * backoff_multiplier^n`.
/// There is no jitter and no upper bound, and no delay follows the final attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the first retry, in seconds
    pub initial_delay_secs: f64,

    /// Factor applied to the delay after every failed attempt
    pub backoff_multiplier: f64,

    /// Kinds worth retrying; `None` retries every failure
    pub retry_on: Option<Vec<ErrorKind>>,

    /// Log each attempt at debug level
    pub log_attempts: bool,
}

impl RetryPolicy {
    /// Defaults: 3 attempts, 1s initial delay, x2 backoff, connection-class errors only
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_delay(mut self, secs: f64) -> Self {
        self.initial_delay_secs = secs;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn retry_on(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retry_on = Some(kinds.into_iter().collect());
        self
    }

    /// Retry every failure regardless of kind
    pub fn retry_all(mut self) -> Self {
        self.retry_on = None;
        self
    }

    pub fn with_attempt_logging(mut self, enabled: bool) -> Self {
        self.log_attempts = enabled;
        self
    }

    pub fn is_retryable(&self, error: &DatabaseError) -> bool {
        match &self.retry_on {
            Some(kinds) => kinds.contains(&error.kind()),
            None => true,
        }
    }

    /// Delay to wait after the failed attempt `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        secs_to_duration(self.initial_delay_secs * self.backoff_multiplier.powi(exponent))
    }

    /// Every delay this policy can produce, in order
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.delay_for(attempt))
            .collect()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_secs: 1.0,
            backoff_multiplier: 2.0,
            retry_on: Some(DEFAULT_RETRYABLE.to_vec()),
            log_attempts: false,
        }
    }
}

fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(if secs > 0.0 {
        Duration::MAX
    } else {
        Duration::ZERO
    })
}

/// Run `operation` under `policy`.
///
/// The closure receives the 0-based attempt number. Non-retryable errors are
/// returned as they are; once every attempt failed the result is
/// [`DatabaseError::RetryExhausted`] carrying `exhausted_message`, the attempt
/// count and the last failure.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    exhausted_message: &str,
    operation: F,
) -> DatabaseResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = DatabaseResult<T>>,
{
    retry_with_backoff_hook(policy, exhausted_message, |_| async {}, operation).await
}

/// Like [`retry_with_backoff`], awaiting `before_retry(attempt)` after the
/// backoff delay and before `operation` is called again.
///
/// `operation` is only invoked once the hook has finished, so handles it
/// fetches eagerly already reflect whatever the hook changed.
pub async fn retry_with_backoff_hook<H, HFut, F, Fut, T>(
    policy: &RetryPolicy,
    exhausted_message: &str,
    mut before_retry: H,
    mut operation: F,
) -> DatabaseResult<T>
where
    H: FnMut(u32) -> HFut,
    HFut: Future<Output = ()>,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = DatabaseResult<T>>,
{
    let mut last_error = None;

    for attempt in 0..policy.max_attempts {
        if attempt > 0 {
            before_retry(attempt).await;
        }

        if policy.log_attempts {
            debug!(attempt = attempt + 1, max_attempts = policy.max_attempts, "Attempting operation");
        }

        match operation(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("Operation succeeded after {} retries", attempt);
                }
                return Ok(value);
            }
            Err(e) if !policy.is_retryable(&e) => return Err(e),
            Err(e) => {
                warn!(
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "Attempt failed"
                );

                if attempt + 1 < policy.max_attempts {
                    let delay = policy.delay_for(attempt);
                    debug!("Retrying in {:?}", delay);
                    tokio::time::sleep(delay).await;
                }
                last_error = Some(e);
            }
        }
    }

    Err(DatabaseError::retry_exhausted(
        exhausted_message,
        policy.max_attempts,
        last_error,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{DriverError, DriverErrorKind};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn refused() -> DatabaseError {
        DatabaseError::ConnectionFailed {
            message: "Failed to connect to MongoDB".into(),
            source: Some(DriverError::new(
                DriverErrorKind::ConnectionFailure,
                "connection refused",
            )),
        }
    }

    #[test]
    fn test_schedule_is_multiplicative_without_cap() {
        let policy = RetryPolicy::new().with_max_attempts(5);
        assert_eq!(
            policy.schedule(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
            ]
        );
    }

    #[test]
    fn test_schedule_degenerate_values() {
        assert!(RetryPolicy::new().with_max_attempts(1).schedule().is_empty());
        assert!(RetryPolicy::new().with_max_attempts(0).schedule().is_empty());
        assert_eq!(
            RetryPolicy::new().with_initial_delay(-1.0).delay_for(0),
            Duration::ZERO
        );
    }

    #[test]
    fn test_retryable_kinds() {
        let policy = RetryPolicy::new();
        assert!(policy.is_retryable(&refused()));
        assert!(!policy.is_retryable(&DatabaseError::not_initialized()));
        assert!(RetryPolicy::new().retry_all().is_retryable(&DatabaseError::not_initialized()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_success_after_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(&RetryPolicy::new(), "exhausted", |_| {
            let counter = counter_clone.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < 2 { Err(refused()) } else { Ok("success") }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausted_waits_between_attempts_only() {
        let start = Instant::now();
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result: DatabaseResult<()> =
            retry_with_backoff(&RetryPolicy::new(), "Failed after retries", |_| {
                let attempts = attempts_clone.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(refused())
                }
            })
            .await;

        // 1s + 2s, nothing after the third attempt
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        match result.unwrap_err() {
            DatabaseError::RetryExhausted {
                attempts,
                last_error,
                ..
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(
                    last_error.map(|e| e.kind()),
                    Some(ErrorKind::ConnectionFailed)
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_propagates_immediately() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: DatabaseResult<()> = retry_with_backoff(&RetryPolicy::new(), "exhausted", |_| {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(DatabaseError::not_initialized())
            }
        })
        .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::NotInitialized);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_exhausts_immediately() {
        let policy = RetryPolicy::new().with_max_attempts(0);
        let result: DatabaseResult<()> =
            retry_with_backoff(&policy, "exhausted", |_| async { Ok(()) }).await;

        match result.unwrap_err() {
            DatabaseError::RetryExhausted { attempts, last_error, .. } => {
                assert_eq!(attempts, 0);
                assert!(last_error.is_none());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_numbers_are_passed_in_order() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let _ = retry_with_backoff(&RetryPolicy::new(), "exhausted", |attempt| {
            let seen = seen_clone.clone();
            async move {
                seen.lock().unwrap().push(attempt);
                Err::<(), _>(refused())
            }
        })
        .await;

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hook_runs_before_each_retry_only() {
        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let hook_events = events.clone();
        let op_events = events.clone();

        let result = retry_with_backoff_hook(
            &RetryPolicy::new(),
            "exhausted",
            |attempt| {
                let events = hook_events.clone();
                async move { events.lock().unwrap().push(format!("hook {attempt}")) }
            },
            |attempt| {
                op_events.lock().unwrap().push(format!("op {attempt}"));
                async move { if attempt < 2 { Err(refused()) } else { Ok(attempt) } }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(
            *events.lock().unwrap(),
            vec!["op 0", "hook 1", "op 1", "hook 2", "op 2"]
        );
    }
}
