//! Bounded exponential backoff for source reads and store writes.

use std::future::Future;
use std::time::Duration;

use crate::error::WatchError;

/// Backoff settings shared by every retried operation.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt; 0 disables retrying.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for a single delay.
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Half of this fraction of the delay is added on top (0.0 = none).
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

/// Retries operations failing with a retryable [`WatchError`].
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay before retry number `attempt` (1-based); `None` once the budget is spent.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        let cfg = &self.config;
        if !(1..=cfg.max_retries).contains(&attempt) {
            return None;
        }
        let secs = cfg.initial_backoff.as_secs_f64() * cfg.multiplier.powi(attempt as i32 - 1);
        let backoff = Duration::try_from_secs_f64(secs)
            .map_or(cfg.max_backoff, |delay| delay.min(cfg.max_backoff));
        if cfg.jitter_fraction > 0.0 {
            Some(backoff + backoff.mul_f64(cfg.jitter_fraction / 2.0))
        } else {
            Some(backoff)
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// budget is spent. Exhaustion is reported as [`WatchError::RetryExhausted`].
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, WatchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, WatchError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    attempt += 1;
                    match self.next_delay(attempt) {
                        Some(delay) => {
                            tracing::warn!(
                                operation,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                "retrying"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            tracing::error!(operation, attempts = attempt, error = %e, "retry budget exhausted");
                            return Err(WatchError::RetryExhausted {
                                operation: operation.to_string(),
                                attempts: attempt,
                                last: Box::new(e),
                            });
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
