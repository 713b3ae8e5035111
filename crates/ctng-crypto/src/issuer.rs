//! Issuer signatures: RSA-2048 PKCS#1 v1.5 with SHA-256.
//!
//! Each CA and Logger holds one keypair; monitors hold the public halves.

use ctng_core::{CtngId, IssuerSignature};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::sha2::Sha256;
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::error::CryptoError;

/// Modulus size for issuer keys.
pub const KEY_BITS: usize = 2048;

/// Generate a fresh issuer keypair.
pub fn generate_keypair(rng: &mut (impl rand::RngCore + rand::CryptoRng)) -> crate::Result<(RsaPrivateKey, RsaPublicKey)> {
    let private = RsaPrivateKey::new(rng, KEY_BITS)?;
    let public = RsaPublicKey::from(&private);
    Ok((private, public))
}

/// Sign `msg` for `id`, producing the wire signature record.
pub fn sign(msg: &[u8], key: &RsaPrivateKey, id: &CtngId) -> crate::Result<IssuerSignature> {
    let signing_key = SigningKey::<Sha256>::new(key.clone());
    let signature = signing_key
        .try_sign(msg)
        .map_err(|e| CryptoError::Encoding(e.to_string()))?;
    Ok(IssuerSignature {
        sig: hex::encode(signature.to_vec()),
        id: id.to_string(),
    })
}

/// Verify a wire signature record against `msg` and the signer's public
/// key.
pub fn verify(msg: &[u8], sig: &IssuerSignature, key: &RsaPublicKey) -> crate::Result<()> {
    let raw = hex::decode(&sig.sig)?;
    let signature =
        Signature::try_from(raw.as_slice()).map_err(|e| CryptoError::Encoding(e.to_string()))?;
    let verifying_key = VerifyingKey::<Sha256>::new(key.clone());
    verifying_key
        .verify(msg, &signature)
        .map_err(|_| CryptoError::SignatureInvalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn sign_verify_round_trip() {
        let mut rng = rng();
        let id: CtngId = "C1".parse().unwrap();
        let (private, public) = generate_keypair(&mut rng).unwrap();
        let sig = sign(b"head bytes", &private, &id).unwrap();
        assert_eq!(sig.id, "C1");
        verify(b"head bytes", &sig, &public).unwrap();
    }

    #[test]
    fn tampered_message_rejected() {
        let mut rng = rng();
        let id: CtngId = "L1".parse().unwrap();
        let (private, public) = generate_keypair(&mut rng).unwrap();
        let sig = sign(b"head bytes", &private, &id).unwrap();
        assert!(verify(b"other bytes", &sig, &public).is_err());
    }

    #[test]
    fn tampered_signature_rejected() {
        let mut rng = rng();
        let id: CtngId = "L1".parse().unwrap();
        let (private, public) = generate_keypair(&mut rng).unwrap();
        let mut sig = sign(b"head bytes", &private, &id).unwrap();
        // Flip one nibble of the hex signature.
        let flipped = if sig.sig.ends_with('0') { "1" } else { "0" };
        sig.sig.truncate(sig.sig.len() - 1);
        sig.sig.push_str(flipped);
        assert!(verify(b"head bytes", &sig, &public).is_err());
    }
}
