//! Bounded retries with exponential backoff for tick I/O.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::ReconcileConfig;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_backoff_ms: 100,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ReconcileConfig) -> Self {
        Self {
            attempts: config.io_retries.max(1),
            base_backoff_ms: config.retry_base_ms,
            max_backoff_ms: config.retry_max_ms,
        }
    }

    /// No waiting between attempts
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            base_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    pub fn backoff_duration(&self, retry_count: u32) -> Duration {
        let delay = self
            .base_backoff_ms
            .saturating_mul(2u64.saturating_pow(retry_count));
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }

    /// Run `op` until it succeeds or attempts are exhausted; the last error is returned
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt + 1 < attempts => {
                    let delay = self.backoff_duration(attempt);
                    warn!(
                        op = what,
                        attempt = attempt + 1,
                        of = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "I/O failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
