//! Error types for Cinder Core startup and configuration.

use thiserror::Error;

use crate::provider::ProviderError;

/// Core error type for configuration and server lifecycle.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration sources could not be read or deserialized
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Configuration was read but is inconsistent
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Provider could not be constructed
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// Result type alias for Cinder Core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
