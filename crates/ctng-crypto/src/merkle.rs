//! Merkle trees over equal-length leaves.
//!
//! The pairing rule is fixed: leaves are SHA-256 hashed, levels combine
//! left-right, and an odd node at the end of a level is paired with itself.
//! Producer and verifier must agree on this rule byte-exact, since the
//! resulting roots are bound into signed heads.

use ctng_core::InclusionProof;

use crate::hash::sha256;

/// A fully materialized tree; level 0 holds the leaf hashes.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<[u8; 32]>>,
}

impl MerkleTree {
    /// Build a tree over the given leaves. Returns `None` for an empty
    /// leaf set, which has no meaningful root.
    pub fn build(leaves: &[Vec<u8>]) -> Option<Self> {
        if leaves.is_empty() {
            return None;
        }
        let mut levels = vec![leaves.iter().map(|l| sha256(l)).collect::<Vec<_>>()];
        while levels[levels.len() - 1].len() > 1 {
            let prev = &levels[levels.len() - 1];
            let mut next = Vec::with_capacity(prev.len().div_ceil(2));
            for pair in prev.chunks(2) {
                let left = pair[0];
                // Duplicate the last node when the level is odd.
                let right = *pair.get(1).unwrap_or(&pair[0]);
                next.push(combine(&left, &right));
            }
            levels.push(next);
        }
        Some(MerkleTree { levels })
    }

    /// The tree root.
    pub fn root(&self) -> [u8; 32] {
        self.levels[self.levels.len() - 1][0]
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    /// Inclusion proof for the leaf at `index`.
    pub fn prove(&self, index: usize) -> Option<InclusionProof> {
        if index >= self.leaf_count() {
            return None;
        }
        let mut siblings = Vec::new();
        let mut pos = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = if pos % 2 == 0 {
                // Right neighbor, or self when this is a trailing odd node.
                *level.get(pos + 1).unwrap_or(&level[pos])
            } else {
                level[pos - 1]
            };
            siblings.push(sibling);
            pos /= 2;
        }
        Some(InclusionProof {
            siblings,
            leaf_index: index,
            tree_size: self.leaf_count(),
        })
    }
}

/// Verify that `leaf` sits at `proof.leaf_index` under `root`.
pub fn verify(root: &[u8], proof: &InclusionProof, leaf: &[u8]) -> bool {
    if proof.tree_size == 0 || proof.leaf_index >= proof.tree_size {
        return false;
    }
    if proof.siblings.len() != proof_depth(proof.tree_size) {
        return false;
    }
    let mut current = sha256(leaf);
    let mut pos = proof.leaf_index;
    for sibling in &proof.siblings {
        current = if pos % 2 == 0 {
            combine(&current, sibling)
        } else {
            combine(sibling, &current)
        };
        pos /= 2;
    }
    current[..] == root[..]
}

fn combine(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    sha256(&buf)
}

fn proof_depth(mut size: usize) -> usize {
    let mut depth = 0;
    while size > 1 {
        size = size.div_ceil(2);
        depth += 1;
    }
    depth
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn leaves(n: usize) -> Vec<Vec<u8>> {
        (0..n).map(|i| vec![i as u8; 16]).collect()
    }

    #[test]
    fn empty_leaf_set_has_no_tree() {
        assert!(MerkleTree::build(&[]).is_none());
    }

    #[test]
    fn single_leaf_root_is_leaf_hash() {
        let tree = MerkleTree::build(&leaves(1)).unwrap();
        assert_eq!(tree.root(), sha256(&vec![0u8; 16]));
        let proof = tree.prove(0).unwrap();
        assert!(verify(&tree.root(), &proof, &vec![0u8; 16]));
    }

    #[test]
    fn proves_every_leaf_odd_and_even_sizes() {
        for n in 1..=9 {
            let data = leaves(n);
            let tree = MerkleTree::build(&data).unwrap();
            for (i, leaf) in data.iter().enumerate() {
                let proof = tree.prove(i).unwrap();
                assert!(verify(&tree.root(), &proof, leaf), "n={n} i={i}");
            }
        }
    }

    #[test]
    fn rejects_wrong_leaf_and_wrong_root() {
        let data = leaves(5);
        let tree = MerkleTree::build(&data).unwrap();
        let proof = tree.prove(2).unwrap();
        assert!(!verify(&tree.root(), &proof, &data[3]));
        assert!(!verify(&[0u8; 32], &proof, &data[2]));
    }

    #[test]
    fn rejects_truncated_proof() {
        let data = leaves(6);
        let tree = MerkleTree::build(&data).unwrap();
        let mut proof = tree.prove(1).unwrap();
        proof.siblings.pop();
        assert!(!verify(&tree.root(), &proof, &data[1]));
    }

    proptest! {
        #[test]
        fn inclusion_round_trip(n in 1usize..40, seed in 0u8..255) {
            let data: Vec<Vec<u8>> =
                (0..n).map(|i| vec![seed.wrapping_add(i as u8); 8]).collect();
            let tree = MerkleTree::build(&data).unwrap();
            for (i, leaf) in data.iter().enumerate() {
                let proof = tree.prove(i).unwrap();
                prop_assert!(verify(&tree.root(), &proof, leaf));
            }
        }

        #[test]
        fn foreign_leaf_rejected(n in 2usize..40) {
            let data: Vec<Vec<u8>> = (0..n).map(|i| vec![i as u8; 8]).collect();
            let tree = MerkleTree::build(&data).unwrap();
            let proof = tree.prove(0).unwrap();
            prop_assert!(!verify(&tree.root(), &proof, &[0xAA; 8]));
        }
    }
}
