//! Broker-message ingestion: topic parsing, payload decoding, and the
//! pipeline that turns deliveries into store mutations and lifecycle
//! triggers.

pub mod payload;
pub mod service;
pub mod topic;

// Re-export main interfaces
pub use payload::{EventPayload, TelemetryPayload};
pub use service::{IngestConfig, IngestService, IngestStats, Pipeline};
pub use topic::{ParsedTopic, TopicKind};

use plant_common::data::types::DataError;
use plant_common::error::{ErrorCategory, ErrorClassification};
use thiserror::Error;

use crate::orders::OrderError;

/// Ingestion failure taxonomy.
///
/// Decode, validation and reference failures are drop-and-log conditions —
/// the message is lost by design (no retry, no dead-letter queue). Store and
/// lifecycle failures propagate to the processing loop, which logs them and
/// moves on without retrying the unit of work.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum IngestError {
    /// Unparseable topic or payload.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Decoded payload failed a validation precondition.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Payload references a machine or order that does not exist.
    #[error("Reference error: {0}")]
    Reference(String),

    /// Persistence failure.
    #[error("Store error: {0}")]
    Store(#[from] DataError),

    /// Lifecycle transition failure.
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] OrderError),

    /// A service task ended abnormally.
    #[error("Task error: {0}")]
    Task(String),
}

impl IngestError {
    /// Drop-and-log conditions: the message is discarded, processing
    /// continues quietly.
    pub fn is_drop(&self) -> bool {
        matches!(
            self,
            IngestError::Decode(_) | IngestError::Validation(_) | IngestError::Reference(_)
        )
    }
}

impl ErrorClassification for IngestError {
    fn category(&self) -> ErrorCategory {
        match self {
            IngestError::Decode(_) | IngestError::Validation(_) | IngestError::Reference(_) => {
                ErrorCategory::Permanent
            }
            IngestError::Store(e) => e.category(),
            IngestError::Lifecycle(OrderError::Data(e)) => e.category(),
            IngestError::Lifecycle(_) => ErrorCategory::Permanent,
            IngestError::Task(_) => ErrorCategory::Internal,
        }
    }
}

#[cfg(test)]
mod service_tests;
