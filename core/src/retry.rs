//! Retry engine
//!
//! Runs an operation under a policy: bounded attempts, exponential backoff
//! with optional jitter, rate-limit delays honored, cooperative
//! cancellation.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ClassifiedError, ErrorCategory};

/// Parameters governing how a retryable operation is re-attempted
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Additional tries after the first attempt
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Ceiling for any computed delay
    pub max_delay: Duration,
    /// Backoff multiplier, >= 1.0
    pub multiplier: f64,
    /// Apply up to +/-20% random jitter to each delay
    pub jitter: bool,
}

impl RetryPolicy {
    /// Default policy: {3, 100ms, 5s, 2.0, jitter on}
    pub fn standard() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// Network policy: {5, 500ms, 30s, 2.0, jitter on}
    pub fn network() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// Filesystem policy: {2, 50ms, 500ms, 2.0, jitter off}
    pub fn filesystem() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
            jitter: false,
        }
    }

    /// LLM overload policy: {5, 1s, 60s, 2.0, jitter on}
    pub fn llm_overload() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// No retries at all (single attempt)
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

/// Bookkeeping for a finished retry run
#[derive(Debug, Clone)]
pub struct RetryReport {
    /// Total invocations of the operation (first attempt included)
    pub attempts: u32,
    /// Whether the run ended in success
    pub succeeded: bool,
    /// Last error message observed, if any
    pub last_error: Option<String>,
    /// Wall-clock duration of the whole run
    pub elapsed: Duration,
}

/// Terminal outcome of a retry run
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    /// All attempts failed; carries the final classified error
    #[error("exhausted {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: ClassifiedError,
    },
    /// First permanent error ends the run immediately
    #[error("permanent failure: {0}")]
    Permanent(#[source] ClassifiedError),
    /// Cancellation token fired during a wait or attempt
    #[error("operation cancelled")]
    Cancelled,
}

impl RetryError {
    /// The classified error that ended the run, if one exists
    pub fn classified(&self) -> Option<&ClassifiedError> {
        match self {
            RetryError::Exhausted { source, .. } => Some(source),
            RetryError::Permanent(source) => Some(source),
            RetryError::Cancelled => None,
        }
    }
}

/// Run `op` under `policy`, classifying failures and backing off between
/// retryable ones
///
/// Returns the operation's value together with a [`RetryReport`]. The
/// operation is invoked at most `max_attempts + 1` times.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> (Result<T, RetryError>, RetryReport)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClassifiedError>>,
{
    let started = Instant::now();
    let mut delay = policy.initial_delay;
    let mut attempts = 0u32;
    let mut last_error: Option<String> = None;

    loop {
        if cancel.is_cancelled() {
            let report = report(attempts, false, last_error, started);
            return (Err(RetryError::Cancelled), report);
        }

        attempts += 1;
        let result = tokio::select! {
            r = op() => r,
            _ = cancel.cancelled() => {
                let report = report(attempts, false, last_error, started);
                return (Err(RetryError::Cancelled), report);
            }
        };

        match result {
            Ok(value) => {
                let report = report(attempts, true, last_error, started);
                return (Ok(value), report);
            }
            Err(err) => {
                last_error = Some(err.message.clone());

                match err.category {
                    ErrorCategory::Permanent => {
                        let report = report(attempts, false, last_error, started);
                        return (Err(RetryError::Permanent(err)), report);
                    }
                    ErrorCategory::Retryable | ErrorCategory::RateLimited { .. } => {
                        if attempts > policy.max_attempts {
                            let report = report(attempts, false, last_error, started);
                            return (
                                Err(RetryError::Exhausted {
                                    attempts,
                                    source: err,
                                }),
                                report,
                            );
                        }

                        // Rate-limited responses dictate their own delay
                        let wait = match err.category {
                            ErrorCategory::RateLimited { retry_after } => {
                                retry_after.min(policy.max_delay)
                            }
                            _ => apply_jitter(delay, policy.jitter),
                        };

                        debug!(
                            attempt = attempts,
                            wait_ms = wait.as_millis() as u64,
                            error = %err,
                            "retrying after failure"
                        );

                        tokio::select! {
                            _ = tokio::time::sleep(wait) => {}
                            _ = cancel.cancelled() => {
                                let report = report(attempts, false, last_error, started);
                                return (Err(RetryError::Cancelled), report);
                            }
                        }

                        delay = next_delay(delay, policy);
                    }
                }
            }
        }
    }
}

/// Convenience wrapper discarding the report
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    op: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClassifiedError>>,
{
    run_with_retry(policy, cancel, op).await.0
}

fn next_delay(current: Duration, policy: &RetryPolicy) -> Duration {
    let scaled = current.as_secs_f64() * policy.multiplier.max(1.0);
    Duration::from_secs_f64(scaled).min(policy.max_delay)
}

fn apply_jitter(delay: Duration, jitter: bool) -> Duration {
    if !jitter || delay.is_zero() {
        return delay;
    }
    let factor = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}

fn report(
    attempts: u32,
    succeeded: bool,
    last_error: Option<String>,
    started: Instant,
) -> RetryReport {
    RetryReport {
        attempts,
        succeeded,
        last_error,
        elapsed: started.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let cancel = CancellationToken::new();
        let (result, rep) = run_with_retry(&RetryPolicy::standard(), &cancel, || async {
            Ok::<_, ClassifiedError>(42)
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(rep.attempts, 1);
        assert!(rep.succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let cancel = CancellationToken::new();
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let (result, rep) = run_with_retry(&RetryPolicy::standard(), &cancel, move || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ClassifiedError::retryable("flaky"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(rep.attempts, 3);
        assert!(rep.succeeded);
        assert_eq!(rep.last_error.as_deref(), Some("flaky"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_bound() {
        let cancel = CancellationToken::new();
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let policy = RetryPolicy::standard();

        let (result, rep) = run_with_retry(&policy, &cancel, move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ClassifiedError::retryable("always fails"))
            }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Exhausted { .. })));
        // max_attempts + 1 total invocations
        assert_eq!(counter.load(Ordering::SeqCst), policy.max_attempts + 1);
        assert_eq!(rep.attempts, policy.max_attempts + 1);
    }

    #[tokio::test]
    async fn test_permanent_fails_immediately() {
        let cancel = CancellationToken::new();
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let (result, _) = run_with_retry(&RetryPolicy::standard(), &cancel, move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ClassifiedError::permanent("bad input"))
            }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Permanent(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_uses_carried_delay() {
        let cancel = CancellationToken::new();
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let started = Instant::now();
        let (result, _) = run_with_retry(&RetryPolicy::llm_overload(), &cancel, move || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ClassifiedError::rate_limited(
                        "slow down",
                        Duration::from_secs(10),
                    ))
                } else {
                    Ok(1)
                }
            }
        })
        .await;

        assert!(result.is_ok());
        // The single wait was the carried 10s, not the 1s initial delay
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_wait() {
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_clone.cancel();
        });

        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: false,
        };

        let (result, rep) = run_with_retry(&policy, &cancel, || async {
            Err::<(), _>(ClassifiedError::retryable("fail fast, wait long"))
        })
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert!(!rep.succeeded);
    }

    #[test]
    fn test_canonical_policies() {
        let def = RetryPolicy::standard();
        assert_eq!(def.max_attempts, 3);
        assert_eq!(def.initial_delay, Duration::from_millis(100));
        assert!(def.jitter);

        let net = RetryPolicy::network();
        assert_eq!(net.max_attempts, 5);
        assert_eq!(net.max_delay, Duration::from_secs(30));

        let fs = RetryPolicy::filesystem();
        assert_eq!(fs.max_attempts, 2);
        assert!(!fs.jitter);

        let llm = RetryPolicy::llm_overload();
        assert_eq!(llm.initial_delay, Duration::from_secs(1));
        assert_eq!(llm.max_delay, Duration::from_secs(60));
    }

    #[test]
    fn test_delay_growth_capped() {
        let policy = RetryPolicy::standard();
        let mut d = policy.initial_delay;
        for _ in 0..20 {
            d = next_delay(d, &policy);
        }
        assert_eq!(d, policy.max_delay);
    }
}
