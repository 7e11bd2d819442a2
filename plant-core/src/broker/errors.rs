use thiserror::Error;

use plant_common::error::{ErrorCategory, ErrorClassification};

/// Broker client error types.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BrokerError {
    /// Connection or bind failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Subscription could not be established
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// The delivery channel closed while subscribed
    #[error("Delivery channel closed")]
    Closed,
}

impl From<std::io::Error> for BrokerError {
    fn from(err: std::io::Error) -> Self {
        BrokerError::Connection(err.to_string())
    }
}

impl ErrorClassification for BrokerError {
    fn category(&self) -> ErrorCategory {
        match self {
            BrokerError::Connection(_) => ErrorCategory::Transient,
            BrokerError::Subscription(_) => ErrorCategory::Configuration,
            BrokerError::Closed => ErrorCategory::Transient,
        }
    }
}

/// Result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;
