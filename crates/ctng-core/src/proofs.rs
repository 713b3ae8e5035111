//! Proofs of misbehavior.

use serde::{Deserialize, Serialize};

use crate::heads::HeadKind;
use crate::identifiers::CtngId;

/// Conflict proof: two distinct, validly signed heads from the same issuer
/// for the same period. Holding one is sufficient evidence of equivocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictProof {
    /// The equivocating issuer.
    pub entity: CtngId,
    /// The head that triggered the conflict.
    pub artifact1: HeadKind,
    /// The head already on record.
    pub artifact2: HeadKind,
}

/// Accusation proof: a quorum-signed claim that an issuer withheld the
/// promised artifact. Construction is future work; the FSM only guards
/// against double entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccusationProof {
    /// The accused issuer.
    pub entity: CtngId,
    /// Serialized threshold signature backing the accusation.
    pub signature: String,
}
