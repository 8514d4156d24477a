//! Configuration error types.

use thiserror::Error;

/// Errors loading configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The underlying config source failed to load or deserialize.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A section failed validation.
    #[error("Invalid configuration: {0}")]
    Validation(#[from] ValidationError),
}

/// Validation failures for individual configuration sections.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required value was not provided.
    #[error("Missing required configuration: {0}")]
    MissingRequired(&'static str),

    /// The server port is invalid.
    #[error("Server port must be non-zero")]
    InvalidPort,

    /// A timeout is out of range.
    #[error("Timeout out of range: {0}")]
    InvalidTimeout(&'static str),

    /// A chat tuning value is out of range.
    #[error("Invalid chat setting: {0}")]
    InvalidChatSetting(&'static str),
}
