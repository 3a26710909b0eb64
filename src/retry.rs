use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub retries: u32,
    pub retry_delay: Duration,
    /// Growth factor applied to `retry_delay` per attempt; 1.0 keeps it fixed.
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 0,
            retry_delay: Duration::from_secs(300),
            multiplier: 1.0,
            max_delay: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    pub fn new(retries: u32, retry_delay: Duration) -> Self {
        Self {
            retries,
            retry_delay,
            ..Default::default()
        }
    }

    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn with_exponential_backoff(mut self, multiplier: f64, max_delay: Duration) -> Self {
        self.multiplier = multiplier;
        self.max_delay = max_delay;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

/// Result of driving an operation through a retry policy.
#[derive(Debug)]
pub struct Attempted<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
    /// The run was cancelled while waiting to retry, so the remaining budget
    /// was abandoned.
    pub cancelled: bool,
}

pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: &RetryPolicy) -> Self {
        let mut policy = policy.clone();

        if policy.multiplier <= 0.0 || !policy.multiplier.is_finite() {
            policy.multiplier = 1.0;
        }
        if policy.max_delay < policy.retry_delay {
            policy.max_delay = policy.retry_delay;
        }

        Self { policy }
    }

    /// Runs `operation` until it succeeds or `retries + 1` attempts have been
    /// made. Every error consumes budget; there is no transient/fatal split.
    /// The first attempt always runs; callers check cancellation before
    /// starting. No retry starts once `ctx` is cancelled.
    pub async fn execute_with_retry<F, Fut, T, E>(
        &self,
        ctx: &CancellationToken,
        task_name: &str,
        mut operation: F,
    ) -> Attempted<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 1;

        loop {
            let err = match operation(attempt).await {
                Ok(value) => {
                    return Attempted {
                        result: Ok(value),
                        attempts: attempt,
                        cancelled: false,
                    };
                }
                Err(e) => e,
            };

            if attempt >= max_attempts {
                return Attempted {
                    result: Err(err),
                    attempts: attempt,
                    cancelled: false,
                };
            }

            let wait_time = self.calculate_backoff(attempt);
            warn!(
                task = task_name,
                attempt,
                max_attempts,
                error = %err,
                "attempt failed, retrying in {:?}",
                wait_time
            );

            tokio::select! {
                biased;
                _ = ctx.cancelled() => {}
                _ = sleep(wait_time) => {}
            }

            if ctx.is_cancelled() {
                return Attempted {
                    result: Err(err),
                    attempts: attempt,
                    cancelled: true,
                };
            }

            attempt += 1;
        }
    }

    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let backoff = self.policy.retry_delay.as_secs_f64() * self.policy.multiplier.powi(exponent);

        if !backoff.is_finite() || backoff > self.policy.max_delay.as_secs_f64() {
            self.policy.max_delay
        } else {
            Duration::from_secs_f64(backoff)
        }
    }
}
