//! Signed heads published by issuers.
//!
//! A Logger publishes an STH (signed tree head) over its certificate batch;
//! a CA publishes an SRH (signed revocation head) over its revocation
//! vector. Producers and verifiers must agree byte-for-byte on the signing
//! message, which is the JSON encoding of the head with the `signature`
//! field zeroed; see [`IssuerHead::signing_bytes`].

use serde::{Deserialize, Serialize};

use crate::identifiers::CtngId;
use crate::signatures::IssuerSignature;

/// A Logger's signed tree head for one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sth {
    /// Issuing logger.
    pub lid: CtngId,
    /// Period number.
    pub period: u32,
    /// Number of certificates in the batch.
    pub size: u32,
    /// RFC3339 UTC timestamp.
    pub timestamp: String,
    /// Merkle root binding the batch; interpretation depends on the
    /// distribution mode (certificate root alone, or the root over
    /// `{rs_root, cert_root}` in EEA mode).
    pub head: Vec<u8>,
    /// Issuer signature over the canonical form.
    pub signature: IssuerSignature,
}

/// A CA's signed revocation head for one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Srh {
    /// Issuing CA.
    pub caid: CtngId,
    /// Period number.
    pub period: u32,
    /// EEA mode: `sha256(crv) ‖ sha256(dcrv) ‖ rs_root`. Empty in default
    /// mode, where the artifact hashes are appended to the signing message
    /// instead.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub head: Vec<u8>,
    /// RFC3339 UTC timestamp.
    pub timestamp: String,
    /// Issuer signature over the canonical form.
    pub signature: IssuerSignature,
}

/// Common view over the two head flavors.
pub trait IssuerHead: Clone + PartialEq + Serialize {
    /// The issuer this head speaks for.
    fn issuer(&self) -> &CtngId;

    /// The issuer signature record.
    fn signature(&self) -> &IssuerSignature;

    /// Zero the signature field in place.
    fn clear_signature(&mut self);

    /// Canonical signing bytes: the head serialized with its signature
    /// cleared.
    fn signing_bytes(&self) -> crate::Result<Vec<u8>> {
        let mut unsigned = self.clone();
        unsigned.clear_signature();
        Ok(serde_json::to_vec(&unsigned)?)
    }
}

impl IssuerHead for Sth {
    fn issuer(&self) -> &CtngId {
        &self.lid
    }

    fn signature(&self) -> &IssuerSignature {
        &self.signature
    }

    fn clear_signature(&mut self) {
        self.signature = IssuerSignature::default();
    }
}

impl IssuerHead for Srh {
    fn issuer(&self) -> &CtngId {
        &self.caid
    }

    fn signature(&self) -> &IssuerSignature {
        &self.signature
    }

    fn clear_signature(&mut self) {
        self.signature = IssuerSignature::default();
    }
}

/// Either head flavor; the artifact slots of a conflict proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeadKind {
    #[serde(rename = "STH")]
    Sth(Sth),
    #[serde(rename = "SRH")]
    Srh(Srh),
}

impl HeadKind {
    /// The issuer named inside the wrapped head.
    pub fn issuer(&self) -> &CtngId {
        match self {
            HeadKind::Sth(sth) => &sth.lid,
            HeadKind::Srh(srh) => &srh.caid,
        }
    }
}
