//! Error classification traits for retry and propagation decisions.

use std::time::Duration;

use crate::data::types::DataError;

/// Classification of error types for handling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transient errors that may resolve on retry (network issues, timeouts)
    Transient,
    /// Permanent errors that won't resolve on retry (invalid input, not found)
    Permanent,
    /// Resource exhaustion errors (pool exhausted)
    ResourceExhausted,
    /// Configuration errors (missing config, invalid settings)
    Configuration,
    /// Internal errors (bugs, unexpected state)
    Internal,
}

/// Trait for errors that can classify themselves.
///
/// The ingestion pipeline never retries a failed unit of work itself, but
/// callers embedding this core may; classification lets them decide without
/// matching concrete enums.
pub trait ErrorClassification {
    /// Returns the category of this error
    fn category(&self) -> ErrorCategory;

    /// Returns true if this error is transient and may succeed on retry
    fn is_transient(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::ResourceExhausted
        )
    }

    /// Returns true if this error is permanent and won't succeed on retry
    fn is_permanent(&self) -> bool {
        matches!(self.category(), ErrorCategory::Permanent)
    }

    /// Suggests a delay before retrying, if applicable
    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self.category() {
            ErrorCategory::Transient => Some(Duration::from_millis(100)),
            ErrorCategory::ResourceExhausted => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}

impl ErrorClassification for DataError {
    fn category(&self) -> ErrorCategory {
        match self {
            DataError::Database(e) => match e {
                sqlx::Error::PoolTimedOut => ErrorCategory::ResourceExhausted,
                sqlx::Error::Io(_) => ErrorCategory::Transient,
                _ => ErrorCategory::Permanent,
            },
            DataError::Validation(_) => ErrorCategory::Permanent,
            DataError::NotFound { .. } => ErrorCategory::Permanent,
            DataError::Serialization(_) => ErrorCategory::Permanent,
        }
    }
}
