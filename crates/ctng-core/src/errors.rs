//! Errors for the foundation types.

use thiserror::Error;

/// Errors raised by identifier parsing, settings loading, and canonical
/// serialization.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Identifier does not match `[CLM]<1-based index>`.
    #[error("invalid CTng identifier: {0}")]
    InvalidId(String),

    /// Settings failed structural validation.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// Settings or record file could not be read or written.
    #[error("settings I/O: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode failure.
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}
