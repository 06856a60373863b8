//! Request budget against the chain source.
//!
//! A token bucket: up to `capacity` requests may go out back to back, after
//! which requests are admitted at `refill_rate` per second.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Request budget of one network profile.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Requests allowed in a burst.
    pub capacity: f64,
    /// Sustained requests per second.
    pub refill_rate: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 10.0,
            refill_rate: 10.0,
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

/// Token bucket shared by every request of one source.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// A limiter starting with a full bucket.
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            bucket: Mutex::new(Bucket {
                tokens: config.capacity,
                refilled_at: Instant::now(),
            }),
            config,
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Take a token without waiting.
    pub fn try_acquire(&self) -> bool {
        self.take().is_ok()
    }

    /// Wait until a token is available and take it. Returns the time spent waiting.
    pub async fn acquire(&self) -> Duration {
        let started = Instant::now();
        while let Err(wait) = self.take() {
            let wait = wait.max(Duration::from_millis(1));
            tracing::trace!(wait_ms = wait.as_millis() as u64, "request budget spent, waiting");
            tokio::time::sleep(wait).await;
        }
        started.elapsed()
    }

    /// Take one token, or report how long until one accrues.
    fn take(&self) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let accrued = now.duration_since(bucket.refilled_at).as_secs_f64() * self.config.refill_rate;
        bucket.tokens = (bucket.tokens + accrued).min(self.config.capacity);
        bucket.refilled_at = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }
        let missing = 1.0 - bucket.tokens;
        Err(Duration::try_from_secs_f64(missing / self.config.refill_rate)
            .unwrap_or(Duration::from_secs(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(capacity: f64, refill_rate: f64) -> RateLimiter {
        RateLimiter::new(RateLimiterConfig {
            capacity,
            refill_rate,
        })
    }

    #[test]
    fn burst_up_to_capacity() {
        let rl = limiter(5.0, 0.001);
        for n in 0..5 {
            assert!(rl.try_acquire(), "request {n} within burst");
        }
        assert!(!rl.try_acquire());
    }

    #[test]
    fn empty_bucket_reports_refill_time() {
        let rl = limiter(1.0, 10.0);
        assert!(rl.take().is_ok());
        let wait = rl.take().unwrap_err();
        // one token at 10/s
        assert!(wait <= Duration::from_millis(100), "unexpected wait {wait:?}");
    }

    #[tokio::test]
    async fn acquire_waits_for_refill() {
        let rl = limiter(1.0, 50.0);
        assert!(rl.acquire().await < Duration::from_millis(5));
        // the second token needs ~20ms of refill
        assert!(rl.acquire().await >= Duration::from_millis(10));
    }
}
