//! Error types for the chainwatch pipeline.

use thiserror::Error;

/// Errors that can occur while watching and ingesting the chain.
///
/// "Block not yet produced" is deliberately absent: it is a wait condition
/// reported through the source's fetch result, not a failure.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The chain source could not be reached or timed out.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// A payload returned by the source could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// A store read or write failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A rewind was computed whose start lies outside the tracked window.
    #[error(
        "fork rewind out of range at block {at}: start {start} is below tracked floor {floor}"
    )]
    ForkRewindOutOfRange { start: i128, floor: u64, at: u64 },

    /// A retryable operation kept failing until its retry budget ran out.
    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        last: Box<WatchError>,
    },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl WatchError {
    /// Returns `true` if the error is transient and the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connectivity(_) | Self::Persistence(_))
    }

    /// Returns `true` if the process must terminate on this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ForkRewindOutOfRange { .. } | Self::RetryExhausted { .. } | Self::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(WatchError::Connectivity("timeout".into()).is_retryable());
        assert!(WatchError::Persistence("locked".into()).is_retryable());
        assert!(!WatchError::Decode("bad hex".into()).is_retryable());
        assert!(!WatchError::ForkRewindOutOfRange { start: -3, floor: 0, at: 2 }.is_retryable());
    }

    #[test]
    fn exhausted_retry_is_fatal_and_names_the_operation() {
        let err = WatchError::RetryExhausted {
            operation: "block_at(100)".into(),
            attempts: 4,
            last: Box::new(WatchError::Connectivity("connection refused".into())),
        };
        assert!(err.is_fatal());
        assert_eq!(
            err.to_string(),
            "block_at(100) failed after 4 attempts: connectivity error: connection refused"
        );
    }
}
