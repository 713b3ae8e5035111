//! # CTng Crypto
//!
//! Cryptographic primitives for the gossip network:
//!
//! - SHA-256 digests ([`hash`])
//! - RSA-2048 PKCS#1 v1.5 issuer signatures ([`issuer`])
//! - BLS12-381 threshold signatures over Shamir-shared keys ([`threshold`])
//! - Merkle trees with inclusion proofs ([`merkle`])
//! - the on-disk keystore binding all of the above to entity ids
//!   ([`keyring`])
//!
//! Verification failures are values, not panics: callers at the gossip edge
//! drop the offending message and move on.

pub mod error;
pub mod hash;
pub mod issuer;
pub mod keyring;
pub mod merkle;
pub mod threshold;

pub use error::CryptoError;
pub use hash::sha256;
pub use keyring::{KeyStore, Keyring};
pub use merkle::MerkleTree;

/// Result alias for fallible crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
