//! Per-provider rate limiting and bounded fixed-delay retry.

use super::ProviderError;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep, sleep_until};

/// Enforces a minimum interval between consecutive requests.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter; a zero interval never waits.
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Configured interval.
    #[must_use]
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits until the next request slot and reserves it.
    pub async fn acquire(&self) {
        let mut next = self.next_slot.lock().await;
        if let Some(at) = *next {
            sleep_until(at).await;
        }
        *next = Some(Instant::now() + self.min_interval);
    }

    /// Pushes the next slot out by at least `delay` (server-requested backoff).
    pub async fn defer(&self, delay: Duration) {
        let mut next = self.next_slot.lock().await;
        let at = Instant::now() + delay;
        if next.is_none_or(|n| n < at) {
            *next = Some(at);
        }
    }
}

/// Bounded retry with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay between attempts, milliseconds.
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 3000,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy. At least one attempt is always made.
    #[must_use]
    pub fn new(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay_ms,
        }
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Rate-limit responses wait for the larger of the fixed delay and the
    /// provider's `retry_after`. Decode errors are not retried.
    ///
    /// # Errors
    /// The last error returned by `op`.
    pub async fn run<F, Fut, T>(&self, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_transient() || attempt >= max_attempts => return Err(err),
                Err(err) => {
                    let mut delay = Duration::from_millis(self.delay_ms);
                    if let ProviderError::RateLimited {
                        retry_after: Some(after),
                    } = &err
                    {
                        delay = delay.max(*after);
                    }
                    tracing::debug!(attempt, ?delay, error = %err, "Retrying provider call");
                    sleep(delay).await;
                }
            }
        }
    }
}
