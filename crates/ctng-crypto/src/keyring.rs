//! Key material for one deployment, and its on-disk form.
//!
//! A [`Keyring`] holds every issuer's RSA keypair and the monitors' BLS
//! share set. The simulation generates one keyring up front and every
//! process loads the same file; a production deployment would strip the
//! private halves it does not own.

use std::collections::BTreeMap;
use std::path::Path;

use blsttc::{PublicKeySet, SecretKeyShare};
use ctng_core::{CtngId, IssuerSignature, Role, SignatureFragment, ThresholdSignature};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;
use crate::{issuer, threshold};

/// Runtime key material with typed keys.
#[derive(Clone)]
pub struct Keyring {
    /// Number of monitors in the federation.
    pub total: usize,
    /// Fragments required to aggregate (`f + 1`).
    pub threshold: usize,
    issuer_public: BTreeMap<CtngId, RsaPublicKey>,
    issuer_private: BTreeMap<CtngId, RsaPrivateKey>,
    bls_public: PublicKeySet,
    bls_shares: BTreeMap<CtngId, SecretKeyShare>,
}

impl Keyring {
    /// Generate key material for a full deployment.
    pub fn generate(
        num_cas: usize,
        num_loggers: usize,
        num_monitors: usize,
        threshold: usize,
        rng: &mut (impl rand::RngCore + rand::CryptoRng),
    ) -> crate::Result<Self> {
        let mut issuer_public = BTreeMap::new();
        let mut issuer_private = BTreeMap::new();
        let issuers = (1..=num_cas)
            .map(|i| CtngId::new(Role::Ca, i))
            .chain((1..=num_loggers).map(|i| CtngId::new(Role::Logger, i)));
        for id in issuers {
            let (private, public) = issuer::generate_keypair(rng)?;
            issuer_public.insert(id.clone(), public);
            issuer_private.insert(id, private);
        }

        let monitors: Vec<CtngId> = (1..=num_monitors)
            .map(|i| CtngId::new(Role::Monitor, i))
            .collect();
        let (bls_public, bls_shares) = threshold::generate_shares(&monitors, threshold, rng)?;

        Ok(Keyring {
            total: num_monitors,
            threshold,
            issuer_public,
            issuer_private,
            bls_public,
            bls_shares,
        })
    }

    /// Sign `msg` with `id`'s issuer key.
    pub fn sign(&self, msg: &[u8], id: &CtngId) -> crate::Result<IssuerSignature> {
        let key = self
            .issuer_private
            .get(id)
            .ok_or_else(|| CryptoError::MissingKey(id.clone()))?;
        issuer::sign(msg, key, id)
    }

    /// Verify an issuer signature; the signer is named inside the record.
    pub fn verify(&self, msg: &[u8], sig: &IssuerSignature) -> crate::Result<()> {
        let id: CtngId = sig
            .id
            .parse()
            .map_err(|_| CryptoError::Encoding(format!("bad signer id {:?}", sig.id)))?;
        let key = self
            .issuer_public
            .get(&id)
            .ok_or_else(|| CryptoError::MissingKey(id.clone()))?;
        issuer::verify(msg, sig, key)
    }

    /// Produce a BLS fragment with `id`'s key share.
    pub fn threshold_sign(&self, msg: &[u8], id: &CtngId) -> crate::Result<SignatureFragment> {
        let share = self
            .bls_shares
            .get(id)
            .ok_or_else(|| CryptoError::MissingKey(id.clone()))?;
        Ok(threshold::threshold_sign(msg, share, id))
    }

    /// Verify one fragment against its contributor's public key share.
    pub fn fragment_verify(&self, msg: &[u8], fragment: &SignatureFragment) -> crate::Result<()> {
        threshold::fragment_verify(msg, fragment, &self.bls_public)
    }

    /// Aggregate fragments at the configured threshold.
    pub fn aggregate(&self, fragments: &[SignatureFragment]) -> crate::Result<ThresholdSignature> {
        threshold::aggregate(fragments, self.threshold, &self.bls_public)
    }

    /// Verify a completed threshold signature.
    pub fn threshold_verify(&self, msg: &[u8], sig: &ThresholdSignature) -> crate::Result<()> {
        threshold::threshold_verify(msg, sig, self.threshold, &self.bls_public)
    }

    /// Encode into the storable form.
    pub fn to_store(&self) -> crate::Result<KeyStore> {
        let mut issuer_public = BTreeMap::new();
        for (id, key) in &self.issuer_public {
            let der = key
                .to_public_key_der()
                .map_err(|e| CryptoError::Encoding(e.to_string()))?;
            issuer_public.insert(id.to_string(), hex::encode(der.as_bytes()));
        }
        let mut issuer_private = BTreeMap::new();
        for (id, key) in &self.issuer_private {
            let der = key
                .to_pkcs8_der()
                .map_err(|e| CryptoError::Encoding(e.to_string()))?;
            issuer_private.insert(id.to_string(), hex::encode(der.as_bytes()));
        }
        let bls_shares = self
            .bls_shares
            .iter()
            .map(|(id, share)| (id.to_string(), hex::encode(share.to_bytes())))
            .collect();
        Ok(KeyStore {
            total: self.total,
            threshold: self.threshold,
            issuer_public,
            issuer_private,
            bls_public: hex::encode(self.bls_public.to_bytes()),
            bls_shares,
        })
    }

    /// Write the keyring as a JSON keystore.
    pub fn save(&self, path: impl AsRef<Path>) -> crate::Result<()> {
        let store = self.to_store()?;
        std::fs::write(path, serde_json::to_vec_pretty(&store)?)?;
        Ok(())
    }

    /// Load a keyring from a JSON keystore.
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let raw = std::fs::read(path)?;
        let store: KeyStore = serde_json::from_slice(&raw)?;
        store.decode()
    }
}

/// Serialized key material: hex-encoded DER for RSA, hex-encoded share
/// bytes for BLS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyStore {
    pub total: usize,
    pub threshold: usize,
    pub issuer_public: BTreeMap<String, String>,
    pub issuer_private: BTreeMap<String, String>,
    pub bls_public: String,
    pub bls_shares: BTreeMap<String, String>,
}

impl KeyStore {
    /// Decode into runtime key material.
    pub fn decode(&self) -> crate::Result<Keyring> {
        let mut issuer_public = BTreeMap::new();
        for (id, der_hex) in &self.issuer_public {
            let id: CtngId = id
                .parse()
                .map_err(|_| CryptoError::Encoding(format!("bad id {id:?}")))?;
            let der = hex::decode(der_hex)?;
            let key = RsaPublicKey::from_public_key_der(&der)
                .map_err(|e| CryptoError::Encoding(e.to_string()))?;
            issuer_public.insert(id, key);
        }
        let mut issuer_private = BTreeMap::new();
        for (id, der_hex) in &self.issuer_private {
            let id: CtngId = id
                .parse()
                .map_err(|_| CryptoError::Encoding(format!("bad id {id:?}")))?;
            let der = hex::decode(der_hex)?;
            let key = RsaPrivateKey::from_pkcs8_der(&der)
                .map_err(|e| CryptoError::Encoding(e.to_string()))?;
            issuer_private.insert(id, key);
        }
        let bls_public = PublicKeySet::from_bytes(hex::decode(&self.bls_public)?)
            .map_err(|e| CryptoError::Bls(e.to_string()))?;
        let mut bls_shares = BTreeMap::new();
        for (id, share_hex) in &self.bls_shares {
            let id: CtngId = id
                .parse()
                .map_err(|_| CryptoError::Encoding(format!("bad id {id:?}")))?;
            let raw = hex::decode(share_hex)?;
            let arr: [u8; 32] = raw
                .try_into()
                .map_err(|_| CryptoError::Encoding("bad share length".into()))?;
            let share = SecretKeyShare::from_bytes(arr)
                .map_err(|e| CryptoError::Bls(e.to_string()))?;
            bls_shares.insert(id, share);
        }
        Ok(Keyring {
            total: self.total,
            threshold: self.threshold,
            issuer_public,
            issuer_private,
            bls_public,
            bls_shares,
        })
    }
}
