//! Bounded retry with exponential backoff for external calls.
//!
//! Every attempt runs under its own deadline. Transient failures are
//! retried after `base * 2^(attempt-1)` (capped, ±25% jitter); permanent
//! failures and the last attempt's error are returned as-is.

use std::future::Future;
use std::time::Duration;

use convrag_core::Transient;
use tokio::time::{sleep, timeout};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500), Duration::from_secs(8))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter: true,
        }
    }

    pub fn from_config(config: &convrag_config::RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// A single attempt, no backoff.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff before the attempt following `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.max_delay);

        if !self.jitter {
            return capped;
        }

        let ms = capped.as_millis() as f64;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * ms / 4.0;
        Duration::from_millis((ms + jitter).max(0.0) as u64)
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts
    /// run out. `per_attempt` bounds each individual attempt.
    pub async fn run<T, E, F, Fut>(
        &self,
        operation: &str,
        per_attempt: Duration,
        mut f: F,
    ) -> Result<T, E>
    where
        E: Transient + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            let result = match timeout(per_attempt, f()).await {
                Ok(result) => result,
                Err(_) => Err(E::timed_out(operation, per_attempt)),
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_transient() || attempt >= self.max_attempts {
                return Err(err);
            }

            let delay = self.delay_for(attempt);
            warn!(
                operation,
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient failure, retrying"
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}
