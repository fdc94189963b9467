//! Retry logic with exponential backoff and jitter.
//!
//! Used for every outbound call. The same delay formula also seeds the
//! reconnect schedule published by the connection monitor.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::{CFError, Result};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 30000;
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
/// Symmetric jitter: a delay is scaled by a random factor in `[1 - j, 1 + j]`.
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. Default: 3
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds. Default: 1000
    pub initial_delay_ms: u64,

    /// Maximum delay in milliseconds. Default: 30000
    pub max_delay_ms: u64,

    /// Backoff multiplier. Default: 2.0
    pub backoff_multiplier: f64,

    /// Jitter factor in `[0, 1)`. Default: 0.2
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// Delay before retry number `attempt` (0-indexed), without jitter.
    ///
    /// `min(initial_delay * multiplier ^ attempt, max_delay)`
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponential =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let capped = exponential.min(self.max_delay_ms as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Delay before retry number `attempt` (0-indexed), with symmetric jitter.
    ///
    /// The jittered value never exceeds `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt).as_millis() as f64;
        let jitter = self.jitter_factor.clamp(0.0, 0.99);
        let factor = if jitter > 0.0 {
            1.0 + (rand::random::<f64>() * 2.0 - 1.0) * jitter
        } else {
            1.0
        };
        let jittered = (base * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

/// Builder for RetryPolicy.
#[derive(Debug, Default)]
pub struct RetryPolicyBuilder {
    max_attempts: Option<u32>,
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    backoff_multiplier: Option<f64>,
    jitter_factor: Option<f64>,
}

impl RetryPolicyBuilder {
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn initial_delay_ms(mut self, delay: u64) -> Self {
        self.initial_delay_ms = Some(delay);
        self
    }

    pub fn max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = Some(delay);
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = Some(multiplier);
        self
    }

    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = Some(factor.clamp(0.0, 0.99));
        self
    }

    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            initial_delay_ms: self.initial_delay_ms.unwrap_or(DEFAULT_INITIAL_DELAY_MS),
            max_delay_ms: self.max_delay_ms.unwrap_or(DEFAULT_MAX_DELAY_MS),
            backoff_multiplier: self.backoff_multiplier.unwrap_or(DEFAULT_BACKOFF_MULTIPLIER),
            jitter_factor: self.jitter_factor.unwrap_or(DEFAULT_JITTER_FACTOR),
        }
    }
}

/// Determine if an error is retryable.
pub fn is_retryable(error: &CFError) -> bool {
    error.is_retryable()
}

/// Generic retry-with-backoff wrapper for fallible async operations.
pub struct RetryExecutor;

impl RetryExecutor {
    /// Execute an async operation, retrying retryable failures per `policy`.
    ///
    /// Non-retryable errors are returned immediately. When all attempts fail
    /// the last error is returned, tagged as retries-exhausted.
    ///
    /// ```rust,ignore
    /// let policy = RetryPolicy::default();
    /// let body = RetryExecutor::execute(|| async { fetch().await }, &policy).await?;
    /// ```
    pub async fn execute<T, F, Fut>(operation: F, policy: &RetryPolicy) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        Self::execute_with_predicate(operation, policy, is_retryable).await
    }

    /// Like [`RetryExecutor::execute`] with a custom retry predicate.
    pub async fn execute_with_predicate<T, F, Fut, P>(
        mut operation: F,
        policy: &RetryPolicy,
        should_retry: P,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&CFError) -> bool,
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !should_retry(&e) {
                        return Err(e);
                    }

                    attempt += 1;
                    if attempt >= max_attempts {
                        tracing::warn!(
                            "Giving up after {} attempts: {}",
                            attempt,
                            e.sanitized_message()
                        );
                        return Err(e.exhausted(attempt));
                    }

                    let delay = policy.delay_for_attempt(attempt - 1);
                    tracing::debug!(
                        "Retry attempt {} of {}, waiting {:?}",
                        attempt,
                        max_attempts,
                        delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}
