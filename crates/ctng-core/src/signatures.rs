//! Signature records carried on the wire.
//!
//! These are transport shapes only: the signing and verification math lives
//! in `ctng-crypto`. Binary signature material is hex-encoded so the records
//! stay printable and hashable as JSON.

use serde::{Deserialize, Serialize};

use crate::identifiers::CtngId;

/// An issuer (CA or Logger) signature over a head, with the signer's id so
/// verifiers can look up the right public key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerSignature {
    /// Hex-encoded PKCS#1 v1.5 signature bytes. Empty in the canonical
    /// signing form of a head.
    pub sig: String,
    /// Signer identifier; empty in the canonical signing form.
    pub id: String,
}

impl IssuerSignature {
    /// True when the record is the zeroed placeholder used for signing.
    pub fn is_empty(&self) -> bool {
        self.sig.is_empty() && self.id.is_empty()
    }
}

/// One monitor's BLS threshold-signature share over a canonical head.
///
/// Fragment identity, used for dedup in the aggregation list, is the full
/// `(id, sig)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureFragment {
    /// Contributing monitor.
    pub id: CtngId,
    /// Hex-encoded signature share.
    pub sig: String,
}

/// A completed threshold signature with the contributor set that produced
/// it. Contributor ids are sorted lexicographically before the record is
/// built so the serialized form is stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdSignature {
    /// Sorted ids of the monitors whose fragments were aggregated.
    pub ids: Vec<CtngId>,
    /// Hex-encoded group signature.
    pub sig: String,
}
