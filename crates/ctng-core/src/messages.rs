//! Gossip wire messages exchanged between issuers, monitors, and peers.

use serde::{Deserialize, Serialize};

use crate::heads::{Srh, Sth};
use crate::identifiers::CtngId;

/// Merkle inclusion proof: the sibling hashes along the leaf-to-root path.
///
/// The leaf index determines the left/right direction at each level; the
/// tree size lets verifiers reproduce the duplicate-last-leaf pairing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionProof {
    /// Sibling hashes from leaf level upward.
    pub siblings: Vec<[u8; 32]>,
    /// Index of the proven leaf.
    pub leaf_index: usize,
    /// Number of leaves in the tree.
    pub tree_size: usize,
}

/// One Reed-Solomon shard of a CA's DCRV, with inclusion evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaShardUpdate {
    /// Monitor the issuer assigned this shard to.
    pub monitor_id: CtngId,
    /// The shard bytes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_share: Vec<u8>,
    /// Root of the Merkle tree over all n shards.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub head_rs: Vec<u8>,
    /// Inclusion proof of `file_share` under `head_rs`.
    #[serde(default)]
    pub poi: InclusionProof,
    /// The signed revocation head this shard belongs to.
    pub srh: Srh,
    /// Unpadded DCRV length, for stripping after reconstruction.
    #[serde(default)]
    pub original_len: u32,
}

/// One Reed-Solomon shard of a Logger's certificate batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggerShardUpdate {
    /// Monitor the issuer assigned this shard to.
    pub monitor_id: CtngId,
    /// The shard bytes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_share: Vec<u8>,
    /// Root over the certificate blocks, needed to re-derive the combined
    /// head after reconstruction.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub head_cert: Vec<u8>,
    /// Root of the Merkle tree over all n encoded shards.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub head_rs: Vec<u8>,
    /// Inclusion proof of `file_share` under `head_rs`.
    #[serde(default)]
    pub poi: InclusionProof,
    /// The signed tree head this shard belongs to.
    pub sth: Sth,
}

/// Default-mode logger update: the full certificate block list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggerFullUpdate {
    /// The signed tree head.
    pub sth: Sth,
    /// Certificate blocks; empty for head-only rebroadcasts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file: Vec<Vec<u8>>,
}

/// Notification type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    /// Transparency (logger) shard available, EEA mode.
    #[serde(rename = "TU-EEA")]
    TransparencyEea,
    /// Revocation (CA) shard available, EEA mode.
    #[serde(rename = "RU-EEA")]
    RevocationEea,
    /// Transparency full file available, default mode.
    #[serde(rename = "TU")]
    Transparency,
    /// Revocation update available, default mode.
    #[serde(rename = "RU")]
    Revocation,
}

/// "I hold monitor `monitor`'s shard of issuer `originator`", or, in
/// default mode, "I hold issuer `originator`'s full file".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    /// The issuer the advertised data belongs to.
    pub originator: CtngId,
    /// Owner of the advertised shard position; absent in default mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<CtngId>,
    /// `ip:port` to reply to.
    pub sender: String,
}

/// A monitor's BLS fragment over an issuer's canonical head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialSignature {
    /// Which head flavor was signed.
    pub kind: SignedKind,
    /// The issuer whose head was signed.
    pub ctng_id: CtngId,
    /// The signature fragment.
    pub fragment: crate::signatures::SignatureFragment,
}

/// Head flavor tag for partial signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignedKind {
    #[serde(rename = "STH")]
    Sth,
    #[serde(rename = "SRH")]
    Srh,
}

#[cfg(test)]
mod tests {
    use super::*;

    // The wire tags are part of the protocol; peers parse them by name.

    #[test]
    fn notification_kind_tags_are_stable() {
        let note = Notification {
            kind: NotificationKind::TransparencyEea,
            originator: "L1".parse().unwrap(),
            monitor: Some("M2".parse().unwrap()),
            sender: "127.0.0.1:8005".into(),
        };
        let json = serde_json::to_value(&note).unwrap();
        assert_eq!(json["kind"], "TU-EEA");
        assert_eq!(json["originator"], "L1");
        assert_eq!(json["monitor"], "M2");

        let full_file = Notification {
            kind: NotificationKind::Transparency,
            originator: "L1".parse().unwrap(),
            monitor: None,
            sender: "127.0.0.1:8005".into(),
        };
        let json = serde_json::to_value(&full_file).unwrap();
        assert_eq!(json["kind"], "TU");
        assert!(json.get("monitor").is_none());

        let round: Notification = serde_json::from_value(json).unwrap();
        assert_eq!(round, full_file);
    }

    #[test]
    fn signed_kind_tags_are_stable() {
        assert_eq!(
            serde_json::to_value(SignedKind::Sth).unwrap(),
            serde_json::json!("STH")
        );
        assert_eq!(
            serde_json::to_value(SignedKind::Srh).unwrap(),
            serde_json::json!("SRH")
        );
    }

    #[test]
    fn head_only_ca_update_omits_empty_fields() {
        let update = CaShardUpdate {
            monitor_id: "M1".parse().unwrap(),
            file_share: Vec::new(),
            head_rs: Vec::new(),
            poi: InclusionProof::default(),
            srh: Srh {
                caid: "C1".parse().unwrap(),
                period: 1,
                head: Vec::new(),
                timestamp: "2025-01-01T00:00:00Z".into(),
                signature: Default::default(),
            },
            original_len: 0,
        };
        let json = serde_json::to_value(&update).unwrap();
        assert!(json.get("file_share").is_none());
        assert!(json.get("head_rs").is_none());
        // And the SRH itself drops its absent head.
        assert!(json["srh"].get("head").is_none());

        let round: CaShardUpdate = serde_json::from_value(json).unwrap();
        assert_eq!(round, update);
    }
}
