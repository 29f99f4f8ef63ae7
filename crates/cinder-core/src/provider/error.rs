//! Error types for resource provider operations.

use std::io;
use thiserror::Error;

/// Result type for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors reported by a resource provider adapter.
///
/// Messages carry the provider's raw error text so callers can act on it.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider refused to create the compute unit.
    #[error("allocation failed: {0}")]
    Allocation(String),

    /// The provider failed to tear down the compute unit.
    #[error("release failed: {0}")]
    Release(String),

    /// The provider could not report the unit's state.
    #[error("inspect failed: {0}")]
    Inspect(String),

    /// The provider could not return the unit's logs.
    #[error("log fetch failed: {0}")]
    Logs(String),

    /// The container runtime or remote API is not reachable.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// Authentication against the provider failed.
    #[error("provider authentication failed: {0}")]
    Auth(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Malformed provider response.
    #[error("unexpected provider response: {0}")]
    Json(#[from] serde_json::Error),
}
