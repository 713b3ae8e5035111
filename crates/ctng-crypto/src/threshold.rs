//! BLS12-381 threshold signatures over Shamir-shared keys.
//!
//! Key generation draws one master secret polynomial of degree `f` and
//! deals each monitor the share at its id-derived index, so `f + 1`
//! fragments interpolate to the group signature. Aggregation is therefore
//! deterministic: any valid quorum yields the same group signature, and the
//! contributor id list is sorted before the record is built so the wire
//! form is stable too.

use std::collections::BTreeMap;

use blsttc::{PublicKeySet, SecretKeySet, SecretKeyShare, Signature, SignatureShare};
use ctng_core::{CtngId, SignatureFragment, ThresholdSignature};

use crate::error::CryptoError;

/// Deal threshold key shares to the monitor set.
///
/// `threshold` is the number of fragments required to aggregate (`f + 1`);
/// each monitor's share index is its zero-based id index.
pub fn generate_shares(
    monitors: &[CtngId],
    threshold: usize,
    rng: &mut impl rand::RngCore,
) -> crate::Result<(PublicKeySet, BTreeMap<CtngId, SecretKeyShare>)> {
    if threshold == 0 || threshold > monitors.len() {
        return Err(CryptoError::Bls(format!(
            "threshold {threshold} out of range for {} monitors",
            monitors.len()
        )));
    }
    let secret_set = SecretKeySet::try_random(threshold - 1, rng)
        .map_err(|e| CryptoError::Bls(e.to_string()))?;
    let public_set = secret_set.public_keys();
    let mut shares = BTreeMap::new();
    for id in monitors {
        let index = share_index(id)?;
        shares.insert(id.clone(), secret_set.secret_key_share(index));
    }
    Ok((public_set, shares))
}

/// Sign `msg` with a monitor's key share, producing the wire fragment.
pub fn threshold_sign(msg: &[u8], share: &SecretKeyShare, id: &CtngId) -> SignatureFragment {
    SignatureFragment {
        id: id.clone(),
        sig: hex::encode(share.sign(msg).to_bytes()),
    }
}

/// Verify a single fragment against the contributor's public key share.
pub fn fragment_verify(
    msg: &[u8],
    fragment: &SignatureFragment,
    public_set: &PublicKeySet,
) -> crate::Result<()> {
    let index = share_index(&fragment.id)?;
    let share = decode_share(&fragment.sig)?;
    if public_set.public_key_share(index).verify(&share, msg) {
        Ok(())
    } else {
        Err(CryptoError::FragmentInvalid)
    }
}

/// Aggregate `threshold` or more fragments into the group signature.
///
/// Fails with [`CryptoError::InsufficientFragments`] below the threshold;
/// otherwise interpolates the shares and records the sorted contributor
/// set.
pub fn aggregate(
    fragments: &[SignatureFragment],
    threshold: usize,
    public_set: &PublicKeySet,
) -> crate::Result<ThresholdSignature> {
    if fragments.len() < threshold {
        return Err(CryptoError::InsufficientFragments {
            got: fragments.len(),
            need: threshold,
        });
    }
    let mut indexed = Vec::with_capacity(fragments.len());
    for fragment in fragments {
        indexed.push((share_index(&fragment.id)?, decode_share(&fragment.sig)?));
    }
    let signature = public_set
        .combine_signatures(indexed.iter().map(|(i, s)| (*i, s)))
        .map_err(|e| CryptoError::Bls(e.to_string()))?;

    let mut ids: Vec<CtngId> = fragments.iter().map(|f| f.id.clone()).collect();
    ids.sort();
    Ok(ThresholdSignature {
        ids,
        sig: hex::encode(signature.to_bytes()),
    })
}

/// Verify a completed threshold signature against the group public key.
pub fn threshold_verify(
    msg: &[u8],
    signature: &ThresholdSignature,
    threshold: usize,
    public_set: &PublicKeySet,
) -> crate::Result<()> {
    if signature.ids.len() < threshold {
        return Err(CryptoError::ThresholdInvalid);
    }
    let raw = hex::decode(&signature.sig)?;
    let arr: [u8; 96] = raw
        .try_into()
        .map_err(|_| CryptoError::Encoding("bad signature length".into()))?;
    let group_sig =
        Signature::from_bytes(arr).map_err(|e| CryptoError::Bls(e.to_string()))?;
    if public_set.public_key().verify(&group_sig, msg) {
        Ok(())
    } else {
        Err(CryptoError::ThresholdInvalid)
    }
}

fn share_index(id: &CtngId) -> crate::Result<usize> {
    id.index()
        .map_err(|e| CryptoError::Encoding(e.to_string()))
}

fn decode_share(sig_hex: &str) -> crate::Result<SignatureShare> {
    let raw = hex::decode(sig_hex)?;
    let arr: [u8; 96] = raw
        .try_into()
        .map_err(|_| CryptoError::Encoding("bad fragment length".into()))?;
    SignatureShare::from_bytes(arr).map_err(|e| CryptoError::Bls(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn monitors(n: usize) -> Vec<CtngId> {
        (1..=n)
            .map(|i| CtngId::new(ctng_core::Role::Monitor, i))
            .collect()
    }

    fn setup(n: usize, threshold: usize) -> (PublicKeySet, BTreeMap<CtngId, SecretKeyShare>) {
        let mut rng = StdRng::seed_from_u64(7);
        generate_shares(&monitors(n), threshold, &mut rng).unwrap()
    }

    #[test]
    fn quorum_aggregates_and_verifies() {
        let (pks, shares) = setup(4, 2);
        let msg = b"canonical head";
        let fragments: Vec<_> = monitors(4)
            .iter()
            .take(2)
            .map(|id| threshold_sign(msg, &shares[id], id))
            .collect();
        for fragment in &fragments {
            fragment_verify(msg, fragment, &pks).unwrap();
        }
        let sig = aggregate(&fragments, 2, &pks).unwrap();
        threshold_verify(msg, &sig, 2, &pks).unwrap();
    }

    #[test]
    fn any_quorum_yields_same_signature() {
        let (pks, shares) = setup(4, 2);
        let msg = b"canonical head";
        let all: Vec<_> = monitors(4)
            .iter()
            .map(|id| threshold_sign(msg, &shares[id], id))
            .collect();
        let first = aggregate(&all[0..2], 2, &pks).unwrap();
        let second = aggregate(&all[2..4], 2, &pks).unwrap();
        assert_eq!(first.sig, second.sig);
    }

    #[test]
    fn below_threshold_fails() {
        let (pks, shares) = setup(4, 3);
        let msg = b"canonical head";
        let id = &monitors(4)[0];
        let fragments = vec![threshold_sign(msg, &shares[id], id)];
        match aggregate(&fragments, 3, &pks) {
            Err(CryptoError::InsufficientFragments { got: 1, need: 3 }) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn fragment_for_wrong_message_rejected() {
        let (pks, shares) = setup(4, 2);
        let id = &monitors(4)[1];
        let fragment = threshold_sign(b"one head", &shares[id], id);
        assert!(fragment_verify(b"another head", &fragment, &pks).is_err());
    }

    #[test]
    fn contributor_ids_are_sorted() {
        let (pks, shares) = setup(4, 2);
        let msg = b"canonical head";
        let ids = monitors(4);
        let fragments = vec![
            threshold_sign(msg, &shares[&ids[3]], &ids[3]),
            threshold_sign(msg, &shares[&ids[0]], &ids[0]),
        ];
        let sig = aggregate(&fragments, 2, &pks).unwrap();
        assert_eq!(sig.ids[0].as_str(), "M1");
        assert_eq!(sig.ids[1].as_str(), "M4");
    }
}
