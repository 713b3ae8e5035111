//! SHA-256 digests.

use sha2::{Digest, Sha256};

/// SHA-256 of `data` as a fixed 32-byte digest.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_vector() {
        // SHA-256 of the empty string.
        let digest = sha256(b"");
        assert_eq!(
            hex::encode(digest),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn distinct_inputs_distinct_digests() {
        assert_ne!(sha256(b"crv"), sha256(b"dcrv"));
    }
}
