//! Retry and polling helpers.
//!
//! Two concerns share this module:
//! - transient-failure retries for ARM requests (throttling, 5xx, dropped connections)
//!   with exponential backoff and jitter;
//! - waiting for eventual consistency after a mutation ("resource absent",
//!   "operation reached a terminal state") with a fixed interval and a deadline.
//!
//! # Example
//!
//! ```rust,ignore
//! use azcollection::retry::{RetryPolicy, RetryDecision};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::exponential(3, Duration::from_millis(500), Duration::from_secs(30));
//! let body = policy
//!     .execute(|| client.send(request.clone()), |err, _| {
//!         if err.is_retryable() { RetryDecision::retry() } else { RetryDecision::GiveUp }
//!     })
//!     .await?;
//!
//! // Poll until the share is gone, at most ten minutes.
//! wait_until(Duration::from_secs(20), Duration::from_secs(600), || fetch(), |s| s.is_none()).await?;
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Backoff strategy for calculating delay between retries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Constant delay between retries.
    Constant,

    /// Linear backoff: delay = initial_delay * (attempt + 1)
    Linear,

    /// Exponential backoff: delay = initial_delay * multiplier^attempt
    Exponential {
        /// Multiplier for exponential growth (default: 2.0)
        multiplier: f64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential { multiplier: 2.0 }
    }
}

impl BackoffStrategy {
    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn calculate_delay(&self, attempt: u32, initial_delay: Duration) -> Duration {
        let base_millis = initial_delay.as_millis() as f64;

        let delay_millis = match self {
            Self::Constant => base_millis,
            Self::Linear => base_millis * (f64::from(attempt) + 1.0),
            Self::Exponential { multiplier } => base_millis * multiplier.powf(f64::from(attempt)),
        };

        Duration::from_millis(delay_millis as u64)
    }
}

/// Jitter strategy for adding randomness to delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter - use exact calculated delay.
    None,

    /// Full jitter: random value between 0 and calculated delay.
    Full,

    /// Equal jitter: half the delay plus random jitter up to the other half.
    Equal,
}

impl Default for JitterStrategy {
    fn default() -> Self {
        Self::Full
    }
}

impl JitterStrategy {
    /// Apply jitter to a calculated delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        let delay_millis = delay.as_millis() as f64;
        let mut rng = rand::thread_rng();

        let jittered = match self {
            Self::None => delay_millis,
            Self::Full => {
                if delay_millis > 0.0 {
                    rng.gen_range(0.0..delay_millis)
                } else {
                    0.0
                }
            }
            Self::Equal => {
                let half = delay_millis / 2.0;
                if half > 0.0 {
                    half + rng.gen_range(0.0..half)
                } else {
                    0.0
                }
            }
        };

        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

/// Outcome of inspecting a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again, waiting at least `not_before` if the server asked for it.
    Retry {
        /// Lower bound on the next delay
        not_before: Option<Duration>,
    },
    /// Stop and surface the error.
    GiveUp,
}

impl RetryDecision {
    /// Retry with the policy's own delay.
    pub fn retry() -> Self {
        Self::Retry { not_before: None }
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 means just the initial attempt).
    pub max_retries: u32,

    /// Initial delay before the first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retries (caps exponential growth).
    pub max_delay: Duration,

    /// Maximum total time to spend, including execution time.
    pub max_total_time: Option<Duration>,

    /// Backoff strategy for calculating delays.
    pub backoff: BackoffStrategy,

    /// Jitter strategy for adding randomness.
    pub jitter: JitterStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_total_time: None,
            backoff: BackoffStrategy::default(),
            jitter: JitterStrategy::default(),
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy builder.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Create a policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Create a policy with exponential backoff and full jitter.
    pub fn exponential(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff: BackoffStrategy::Exponential { multiplier: 2.0 },
            jitter: JitterStrategy::Full,
            max_total_time: None,
        }
    }

    /// Create a fixed-interval polling policy bounded only by a deadline.
    pub fn polling(interval: Duration, deadline: Duration) -> Self {
        Self {
            max_retries: u32::MAX,
            initial_delay: interval,
            max_delay: interval,
            max_total_time: Some(deadline),
            backoff: BackoffStrategy::Constant,
            jitter: JitterStrategy::None,
        }
    }

    /// Calculate the delay for a given attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = self.backoff.calculate_delay(attempt, self.initial_delay);
        self.jitter.apply(base_delay.min(self.max_delay))
    }

    /// Check if retrying should continue based on attempt count.
    pub fn should_continue(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Execute an async operation, retrying failures the condition accepts.
    pub async fn execute<F, Fut, T, E, C>(
        &self,
        mut operation: F,
        condition: C,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        C: Fn(&E, u32) -> RetryDecision,
    {
        let start_time = Instant::now();
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!("Operation succeeded after {} retry attempts", attempt);
                    }
                    return Ok(result);
                }
                Err(e) => {
                    let not_before = match condition(&e, attempt) {
                        RetryDecision::GiveUp => return Err(RetryError::Aborted(e)),
                        RetryDecision::Retry { not_before } => not_before,
                    };

                    if !self.should_continue(attempt) {
                        return Err(RetryError::MaxRetriesExceeded {
                            attempts: attempt + 1,
                            last_error: e,
                        });
                    }

                    let mut delay = self.delay_for_attempt(attempt);
                    if let Some(floor) = not_before {
                        delay = delay.max(floor);
                    }

                    if let Some(max_total) = self.max_total_time {
                        let remaining = max_total.saturating_sub(start_time.elapsed());
                        if delay > remaining {
                            return Err(RetryError::TotalTimeoutExceeded {
                                attempts: attempt + 1,
                                elapsed: start_time.elapsed(),
                                last_error: Some(e),
                            });
                        }
                    }

                    warn!("Attempt {} failed: {}; retrying in {:?}", attempt + 1, e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Execute an async probe until its value satisfies `success_condition`.
    ///
    /// Probe errors abort immediately; only "condition not met yet" is retried.
    pub async fn execute_until<F, Fut, T, E, C>(
        &self,
        mut operation: F,
        success_condition: C,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&T) -> bool,
    {
        let start_time = Instant::now();
        let mut attempt = 0;

        loop {
            let value = operation().await.map_err(RetryError::Aborted)?;
            if success_condition(&value) {
                if attempt > 0 {
                    debug!("Condition met after {} polls", attempt);
                }
                return Ok(value);
            }

            if !self.should_continue(attempt) {
                return Err(RetryError::ConditionNotMet {
                    attempts: attempt + 1,
                    elapsed: start_time.elapsed(),
                });
            }

            let delay = self.delay_for_attempt(attempt);
            if let Some(max_total) = self.max_total_time {
                let remaining = max_total.saturating_sub(start_time.elapsed());
                if delay > remaining {
                    return Err(RetryError::ConditionNotMet {
                        attempts: attempt + 1,
                        elapsed: start_time.elapsed(),
                    });
                }
            }

            debug!("Condition not met, polling again in {:?}", delay);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Poll `probe` every `interval` until `predicate` holds or `deadline` passes.
pub async fn wait_until<F, Fut, T, E, P>(
    interval: Duration,
    deadline: Duration,
    probe: F,
    predicate: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&T) -> bool,
{
    RetryPolicy::polling(interval, deadline)
        .execute_until(probe, predicate)
        .await
}

/// Builder for constructing RetryPolicy instances.
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            policy: RetryPolicy::default(),
        }
    }

    /// Set the maximum number of retries.
    pub fn max_retries(mut self, n: u32) -> Self {
        self.policy.max_retries = n;
        self
    }

    /// Set the initial delay before the first retry.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    /// Set the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Set the maximum total time for all retry attempts.
    pub fn max_total_time(mut self, timeout: Duration) -> Self {
        self.policy.max_total_time = Some(timeout);
        self
    }

    /// Set the backoff strategy.
    pub fn backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.policy.backoff = strategy;
        self
    }

    /// Set the jitter strategy.
    pub fn jitter(mut self, strategy: JitterStrategy) -> Self {
        self.policy.jitter = strategy;
        self
    }

    /// Build the RetryPolicy.
    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Error type for retry operations.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The operation failed with an error that is not retried.
    Aborted(E),

    /// Maximum number of retries exceeded.
    MaxRetriesExceeded {
        /// Number of attempts made.
        attempts: u32,
        /// The last error encountered.
        last_error: E,
    },

    /// Total time limit exceeded.
    TotalTimeoutExceeded {
        /// Number of attempts made.
        attempts: u32,
        /// Total elapsed time.
        elapsed: Duration,
        /// The last error encountered (if any).
        last_error: Option<E>,
    },

    /// Success condition was never met.
    ConditionNotMet {
        /// Number of attempts made.
        attempts: u32,
        /// Total elapsed time.
        elapsed: Duration,
    },
}

impl<E> RetryError<E> {
    /// The underlying operation error, if the failure carried one.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Aborted(e) => Some(e),
            RetryError::MaxRetriesExceeded { last_error, .. } => Some(last_error),
            RetryError::TotalTimeoutExceeded { last_error, .. } => last_error,
            RetryError::ConditionNotMet { .. } => None,
        }
    }
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryError::Aborted(e) => write!(f, "{}", e),
            RetryError::MaxRetriesExceeded {
                attempts,
                last_error,
            } => {
                write!(
                    f,
                    "Max retries exceeded after {} attempts. Last error: {}",
                    attempts, last_error
                )
            }
            RetryError::TotalTimeoutExceeded {
                attempts,
                elapsed,
                last_error,
            } => {
                write!(
                    f,
                    "Total timeout exceeded after {} attempts ({:?} elapsed){}",
                    attempts,
                    elapsed,
                    last_error
                        .as_ref()
                        .map(|e| format!(". Last error: {}", e))
                        .unwrap_or_default()
                )
            }
            RetryError::ConditionNotMet { attempts, elapsed } => {
                write!(
                    f,
                    "Condition not met after {} attempts ({:?} elapsed)",
                    attempts, elapsed
                )
            }
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RetryError::Aborted(e) => Some(e),
            RetryError::MaxRetriesExceeded { last_error, .. } => Some(last_error),
            RetryError::TotalTimeoutExceeded {
                last_error: Some(e),
                ..
            } => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_backoff_strategies() {
        let base = Duration::from_millis(100);
        assert_eq!(BackoffStrategy::Constant.calculate_delay(5, base), base);
        assert_eq!(
            BackoffStrategy::Linear.calculate_delay(2, base),
            Duration::from_millis(300)
        );
        assert_eq!(
            BackoffStrategy::Exponential { multiplier: 2.0 }.calculate_delay(3, base),
            Duration::from_millis(800)
        );
    }

    #[test]
    fn test_jitter_bounds() {
        let delay = Duration::from_millis(1000);
        for _ in 0..50 {
            assert!(JitterStrategy::Full.apply(delay) <= delay);
            let equal = JitterStrategy::Equal.apply(delay);
            assert!(equal >= Duration::from_millis(500) && equal <= delay);
        }
        assert_eq!(JitterStrategy::None.apply(delay), delay);
    }

    #[test]
    fn test_delay_capped_by_max() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_secs(10))
            .max_delay(Duration::from_secs(15))
            .jitter(JitterStrategy::None)
            .build();
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_execute_retries_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::builder()
            .max_retries(3)
            .initial_delay(Duration::from_millis(1))
            .jitter(JitterStrategy::None)
            .build();

        let counter = calls.clone();
        let result: Result<u32, RetryError<String>> = policy
            .execute(
                || {
                    let counter = counter.clone();
                    async move {
                        let n = counter.fetch_add(1, Ordering::SeqCst);
                        if n < 2 {
                            Err("transient".to_string())
                        } else {
                            Ok(n)
                        }
                    }
                },
                |_, _| RetryDecision::retry(),
            )
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_execute_gives_up_on_permanent_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), RetryError<String>> = RetryPolicy::default()
            .execute(
                || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err("bad request".to_string())
                    }
                },
                |_, _| RetryDecision::GiveUp,
            )
            .await;

        assert!(matches!(result, Err(RetryError::Aborted(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execute_max_retries() {
        let policy = RetryPolicy::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(1))
            .build();
        let result: Result<(), RetryError<String>> = policy
            .execute(|| async { Err("down".to_string()) }, |_, _| RetryDecision::retry())
            .await;

        match result {
            Err(RetryError::MaxRetriesExceeded { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_wait_until_condition_met() {
        let polls = Arc::new(AtomicU32::new(0));
        let counter = polls.clone();
        let result: Result<u32, RetryError<String>> = wait_until(
            Duration::from_millis(1),
            Duration::from_secs(5),
            || {
                let counter = counter.clone();
                async move { Ok(counter.fetch_add(1, Ordering::SeqCst)) }
            },
            |n| *n >= 3,
        )
        .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_wait_until_deadline() {
        let result: Result<bool, RetryError<String>> = wait_until(
            Duration::from_millis(20),
            Duration::from_millis(50),
            || async { Ok(false) },
            |done| *done,
        )
        .await;

        assert!(matches!(result, Err(RetryError::ConditionNotMet { .. })));
    }

    #[tokio::test]
    async fn test_wait_until_aborts_on_probe_error() {
        let result: Result<bool, RetryError<String>> = wait_until(
            Duration::from_millis(1),
            Duration::from_secs(5),
            || async { Err("forbidden".to_string()) },
            |done| *done,
        )
        .await;

        assert_eq!(result.unwrap_err().into_inner().as_deref(), Some("forbidden"));
    }
}
