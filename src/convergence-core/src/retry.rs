//! Retry with backoff, shared by every pipeline stage.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// How delays grow between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base`, `2 * base`, `4 * base`, ...
    Exponential,
    /// `base` every time.
    Fixed,
}

/// Attempt budget and delay shape for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self::new(max_attempts, base_delay, Backoff::Exponential)
    }

    pub fn fixed(max_attempts: u32, base_delay: Duration) -> Self {
        Self::new(max_attempts, base_delay, Backoff::Fixed)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after the given zero-based attempt failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential => self.base_delay.saturating_mul(1u32 << attempt.min(16)),
        }
    }
}

/// Run `op` until it succeeds or the policy's budget is spent.
///
/// `op` receives the zero-based attempt number. The error of the final
/// attempt is returned when every attempt fails.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    stage: &str,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt + 1 >= policy.max_attempts => {
                warn!(
                    stage,
                    attempts = policy.max_attempts,
                    "giving up after final attempt: {}",
                    e
                );
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                warn!(
                    stage,
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "attempt failed, retrying: {}",
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
