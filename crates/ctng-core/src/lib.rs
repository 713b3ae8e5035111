//! # CTng Core
//!
//! Foundation crate for the CTng gossip network: domain identifiers, signed
//! heads (STH/SRH), gossip wire messages, conflict proofs, settings, and
//! convergence records.
//!
//! This crate holds pure domain types only: no I/O beyond settings file
//! loading, no cryptography (signature *records* live here, the math lives
//! in `ctng-crypto`), and no dependencies on sibling crates.

pub mod config;
pub mod errors;
pub mod heads;
pub mod identifiers;
pub mod messages;
pub mod proofs;
pub mod records;
pub mod signatures;

pub use config::{BroadcastMode, DistributionMode, Settings};
pub use errors::CoreError;
pub use heads::{HeadKind, IssuerHead, Srh, Sth};
pub use identifiers::{CtngId, Role};
pub use messages::{
    CaShardUpdate, InclusionProof, LoggerFullUpdate, LoggerShardUpdate, Notification,
    NotificationKind, PartialSignature, SignedKind,
};
pub use proofs::{AccusationProof, ConflictProof};
pub use records::ConvergenceRecord;
pub use signatures::{IssuerSignature, SignatureFragment, ThresholdSignature};

/// Result alias for fallible core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
