//! Reliability policies wrapped around the chain source and the store.
//!
//! ```text
//! request → [RateLimiter] → source
//! failure → [RetryPolicy] → retry with backoff | RetryExhausted
//! ```

pub mod rate_limiter;
pub mod retry;

pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use retry::{RetryConfig, RetryPolicy};
