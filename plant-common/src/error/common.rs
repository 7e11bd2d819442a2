//! Common error types shared across crates.

use thiserror::Error;

/// Configuration-related errors.
///
/// Use this for configuration loading, parsing, and validation.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// Required field is missing
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Field has invalid value
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// Configuration file could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Environment variable not set
    #[error("Environment variable not set: {0}")]
    EnvVarMissing(String),
}
