//! Exponential backoff for transient backend failures

use crate::provider::{LlmError, LlmResult};
use bionic_core::config::RetryConfig;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Wait before retry number `attempt` (0-based). A server-provided
    /// `Retry-After` takes precedence over the exponential schedule.
    pub fn delay(&self, attempt: u32, retry_after_ms: Option<u64>) -> Duration {
        let wait = match retry_after_ms {
            Some(ms) => Duration::from_millis(ms),
            None => {
                let base_ms = self.base_delay.as_millis() as u64;
                Duration::from_millis(base_ms.saturating_mul(2_u64.saturating_pow(attempt)))
            }
        };
        wait.min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out. Cancellation interrupts the backoff sleep.
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> LlmResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LlmResult<T>>,
    {
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < self.max_attempts => {
                    let wait = self.delay(attempt, e.retry_after_ms());
                    warn!(
                        "attempt {}/{} failed: {}; retrying in {}ms",
                        attempt + 1,
                        self.max_attempts,
                        e,
                        wait.as_millis()
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                        _ = tokio::time::sleep(wait) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
