//! Error types for the Floodgate service.

use thiserror::Error;

/// Main error type for Floodgate operations.
#[derive(Error, Debug)]
pub enum FloodgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Any failure talking to the counter store
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// An override record exists but its fields cannot be used
    #[error("Malformed override record {key}: {reason}")]
    MalformedOverride { key: String, reason: String },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redis::RedisError> for FloodgateError {
    fn from(err: redis::RedisError) -> Self {
        FloodgateError::StoreUnavailable(err.to_string())
    }
}

impl From<config::ConfigError> for FloodgateError {
    fn from(err: config::ConfigError) -> Self {
        FloodgateError::Config(err.to_string())
    }
}

/// Result type alias for Floodgate operations.
pub type Result<T> = std::result::Result<T, FloodgateError>;
