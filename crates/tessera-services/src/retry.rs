//! Retry with exponential backoff and jitter.
//!
//! A policy decides per outcome whether to try again: errors matching the
//! error predicate and results matching the result predicate are retried,
//! anything else is returned as is. Retrying stops after `max_retries`
//! retries or once `max_duration` has elapsed, whichever comes first.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

type Predicate<V> = Box<dyn Fn(&V) -> bool + Send + Sync>;

pub struct RetryPolicy<T, E> {
    base_delay: Duration,
    max_delay: Duration,
    jitter: f64,
    max_retries: u32,
    max_duration: Duration,
    retry_on_error: Predicate<E>,
    retry_on_result: Predicate<T>,
}

#[derive(Debug)]
pub enum RetryError<T, E> {
    /// The operation failed with an error the policy does not handle.
    Rejected(E),
    /// Every allowed attempt asked for a retry. `last` is the final outcome.
    Exhausted {
        attempts: u32,
        elapsed: Duration,
        last: Result<T, E>,
    },
}

impl<T, E> RetryPolicy<T, E> {
    pub fn builder() -> RetryPolicyBuilder<T, E> {
        RetryPolicyBuilder::new()
    }

    /// Backoff before retry number `retry` (0-based), without jitter.
    pub fn backoff_for_retry(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Backoff with jitter applied, within ±`jitter` of the plain backoff.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let backoff = self.backoff_for_retry(retry);
        if self.jitter <= 0.0 {
            return backoff;
        }
        let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        backoff.mul_f64(factor)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn max_duration(&self) -> Duration {
        self.max_duration
    }

    /// Run `op` until it produces an outcome the policy does not retry,
    /// or the retry budget is spent.
    pub async fn run<F, Fut>(&self, mut op: F) -> Result<T, RetryError<T, E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let start = Instant::now();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let outcome = op().await;
            let retry = match &outcome {
                Ok(value) => (self.retry_on_result)(value),
                Err(e) => (self.retry_on_error)(e),
            };
            if !retry {
                return match outcome {
                    Ok(value) => {
                        tracing::debug!(attempts, "succeeded");
                        Ok(value)
                    }
                    Err(e) => Err(RetryError::Rejected(e)),
                };
            }

            let elapsed = start.elapsed();
            let retries_done = attempts - 1;
            if retries_done >= self.max_retries || elapsed >= self.max_duration {
                tracing::warn!(attempts, ?elapsed, "failed, max retries exceeded");
                return Err(RetryError::Exhausted {
                    attempts,
                    elapsed,
                    last: outcome,
                });
            }

            let delay = self
                .delay_for_retry(retries_done)
                .min(self.max_duration - elapsed);
            tracing::info!(attempt = attempts, ?delay, "retry called");
            tokio::time::sleep(delay).await;
        }
    }
}

pub struct RetryPolicyBuilder<T, E> {
    policy: RetryPolicy<T, E>,
}

impl<T, E> RetryPolicyBuilder<T, E> {
    /// Defaults: 1 s → 20 s backoff, no jitter, 3 retries, no time limit,
    /// every error retried, no result retried.
    fn new() -> Self {
        Self {
            policy: RetryPolicy {
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(20),
                jitter: 0.0,
                max_retries: 3,
                max_duration: Duration::MAX,
                retry_on_error: Box::new(|_| true),
                retry_on_result: Box::new(|_| false),
            },
        }
    }

    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.policy.base_delay = base_delay;
        self.policy.max_delay = max_delay.max(base_delay);
        self
    }

    /// Jitter as a fraction of the delay, clamped to 0.0–1.0.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.policy.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.policy.max_duration = max_duration;
        self
    }

    pub fn handle_error_if(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.policy.retry_on_error = Box::new(predicate);
        self
    }

    pub fn handle_result_if(mut self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.policy.retry_on_result = Box::new(predicate);
        self
    }

    pub fn build(self) -> RetryPolicy<T, E> {
        self.policy
    }
}
