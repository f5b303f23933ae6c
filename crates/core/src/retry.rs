//! Bounded retries with exponential backoff for outbound calls.
//!
//! Every model completion and tool execution goes through
//! [`RetryPolicy::execute`]. Failures are classified through
//! [`RetryableError`]; terminal ones return at once, retryable ones wait
//! `min(base * 2^i + jitter, max_delay)` and try again until the budget is
//! spent. Each attempt is recorded so callers can see what happened.

use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, warn};

use crate::error::{FailureClass, RetryableError};

/// Retry budget and backoff shape for one kind of outbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = `max_retries + 1`
    pub max_retries: u32,
    /// Delay before the first retry; doubles per retry
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Uniform random extra added to each delay
    pub jitter: Duration,
    /// Per-attempt timeout; an elapsed timeout is a retryable failure
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_secs(1),
            attempt_timeout: None,
        }
    }
}

/// How a single attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Retryable(String),
    Terminal(String),
}

/// One entry in the attempt log.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    /// 1-based attempt number
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub elapsed: Duration,
}

/// The final result plus every attempt that led to it.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: Vec<AttemptRecord>,
}

impl<T, E> RetryOutcome<T, E> {
    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries, ..Self::default() }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Backoff before retry `retry` (0-based), without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn delay_for(&self, retry: u32, hint: Option<Duration>) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        };
        let computed = self.backoff(retry) + jitter;
        computed.max(hint.unwrap_or_default()).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails terminally or exhausts the budget.
    ///
    /// `operation` names the call in logs and in timeout errors.
    pub async fn execute<T, E, F, Fut>(&self, operation: &str, mut op: F) -> RetryOutcome<T, E>
    where
        E: RetryableError,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempts = Vec::new();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let started = Instant::now();
            let result = match self.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, op()).await {
                    Ok(r) => r,
                    Err(_) => Err(E::timed_out(operation, limit)),
                },
                None => op().await,
            };
            let elapsed = started.elapsed();

            let err = match result {
                Ok(value) => {
                    attempts.push(AttemptRecord { attempt, outcome: AttemptOutcome::Success, elapsed });
                    if attempt > 1 {
                        debug!(operation, attempt, "Succeeded after retry");
                    }
                    return RetryOutcome { result: Ok(value), attempts };
                }
                Err(e) => e,
            };

            match err.failure_class() {
                FailureClass::Terminal => {
                    attempts.push(AttemptRecord {
                        attempt,
                        outcome: AttemptOutcome::Terminal(err.to_string()),
                        elapsed,
                    });
                    warn!(operation, attempt, error = %err, "Terminal failure, not retrying");
                    return RetryOutcome { result: Err(err), attempts };
                }
                FailureClass::Retryable => {
                    attempts.push(AttemptRecord {
                        attempt,
                        outcome: AttemptOutcome::Retryable(err.to_string()),
                        elapsed,
                    });
                    if attempt > self.max_retries {
                        warn!(
                            operation,
                            attempts = attempt,
                            error = %err,
                            "Retry budget exhausted"
                        );
                        return RetryOutcome { result: Err(err), attempts };
                    }
                    let delay = self.delay_for(attempt - 1, err.retry_after());
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retryable failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProviderError, ToolError};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries)
            .with_base_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(100))
            .with_jitter(Duration::ZERO)
    }

    /// Fails with a network error `failures` times, then succeeds.
    async fn flaky(counter: Arc<AtomicU32>, failures: u32) -> Result<&'static str, ProviderError> {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        if n < failures {
            Err(ProviderError::Network("connection reset".into()))
        } else {
            Ok("done")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_retryable_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let outcome = fast(3).execute("completion", || flaky(counter.clone(), 3)).await;
        assert_eq!(outcome.result.unwrap(), "done");
        assert_eq!(outcome.attempts.len(), 4);
        assert_eq!(outcome.attempts[3].outcome, AttemptOutcome::Success);
        assert!(matches!(outcome.attempts[0].outcome, AttemptOutcome::Retryable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_budget_with_last_error() {
        let counter = Arc::new(AtomicU32::new(0));
        let outcome = fast(2).execute("completion", || flaky(counter.clone(), 5)).await;
        assert!(matches!(outcome.result, Err(ProviderError::Network(_))));
        assert_eq!(outcome.attempt_count(), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_failure_returns_immediately() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let outcome: RetryOutcome<(), ProviderError> = fast(5)
            .execute("completion", || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(ProviderError::AuthenticationFailed("bad key".into()))
                }
            })
            .await;
        assert!(!outcome.succeeded());
        assert_eq!(outcome.attempt_count(), 1);
        assert!(matches!(outcome.attempts[0].outcome, AttemptOutcome::Terminal(_)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_means_one_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let outcome = RetryPolicy::none().execute("completion", || flaky(counter.clone(), 1)).await;
        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempt_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_retryable() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let policy = fast(1).with_attempt_timeout(Some(Duration::from_millis(50)));
        let outcome = policy
            .execute("search", || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) == 0 {
                        tokio::time::sleep(Duration::from_secs(10)).await;
                    }
                    Ok::<_, ToolError>("late but fine")
                }
            })
            .await;
        assert_eq!(outcome.attempt_count(), 2);
        assert_eq!(outcome.result.unwrap(), "late but fine");
        match &outcome.attempts[0].outcome {
            AttemptOutcome::Retryable(msg) => assert!(msg.contains("timed out")),
            other => panic!("expected retryable timeout, got {other:?}"),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default().with_jitter(Duration::ZERO);
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(4), Duration::from_secs(16));
        assert_eq!(policy.backoff(5), Duration::from_secs(30));
        assert_eq!(policy.backoff(40), Duration::from_secs(30));
    }

    #[test]
    fn rate_limit_hint_raises_delay_within_cap() {
        let policy = fast(3);
        let hinted = policy.delay_for(0, Some(Duration::from_millis(80)));
        assert_eq!(hinted, Duration::from_millis(80));
        let capped = policy.delay_for(0, Some(Duration::from_secs(60)));
        assert_eq!(capped, Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(3)
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(10))
            .with_jitter(Duration::from_millis(50));
        for _ in 0..50 {
            let d = policy.delay_for(1, None);
            assert!(d >= Duration::from_millis(200));
            assert!(d <= Duration::from_millis(250));
        }
    }
}
