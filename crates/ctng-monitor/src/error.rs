//! Monitor errors.
//!
//! Only startup and shutdown paths surface these; adversarial input at the
//! gossip edge is dropped with a log line, never an error return.

use thiserror::Error;

/// Errors raised by monitor construction, serving, and the final dump.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Core(#[from] ctng_core::CoreError),

    #[error(transparent)]
    Crypto(#[from] ctng_crypto::CryptoError),

    #[error(transparent)]
    Erasure(#[from] ctng_erasure::ErasureError),

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}
