//! Crypto error taxonomy.

use ctng_core::CtngId;
use thiserror::Error;

/// Errors raised by signing, verification, and key management.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// No key material stored for the entity.
    #[error("no key material for {0}")]
    MissingKey(CtngId),

    /// An issuer signature failed verification.
    #[error("issuer signature verification failed")]
    SignatureInvalid,

    /// A threshold-signature fragment failed verification.
    #[error("signature fragment verification failed")]
    FragmentInvalid,

    /// A completed threshold signature failed verification.
    #[error("threshold signature verification failed")]
    ThresholdInvalid,

    /// Aggregation was attempted below the threshold.
    #[error("insufficient fragments: got {got}, need {need}")]
    InsufficientFragments { got: usize, need: usize },

    /// Key generation or RSA signing failed.
    #[error("rsa: {0}")]
    Rsa(#[from] rsa::Error),

    /// Malformed key or signature encoding.
    #[error("encoding: {0}")]
    Encoding(String),

    /// BLS share arithmetic failed.
    #[error("bls: {0}")]
    Bls(String),

    /// Keystore file I/O.
    #[error("keystore I/O: {0}")]
    Io(#[from] std::io::Error),

    /// Keystore JSON encode/decode.
    #[error("keystore serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<hex::FromHexError> for CryptoError {
    fn from(err: hex::FromHexError) -> Self {
        CryptoError::Encoding(err.to_string())
    }
}
