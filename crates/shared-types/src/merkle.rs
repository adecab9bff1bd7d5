//! # Merkle Helpers
//!
//! Binary Keccak-256 tree. An odd node at any level is paired with itself,
//! so a proof is just the sibling list and the leaf index picks the side.

use sha3::{Digest, Keccak256};

use crate::entities::{finalize, Hash};

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(left);
    hasher.update(right);
    finalize(hasher)
}

/// Root over `leaves`. The empty tree has the zero root.
pub fn compute_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return [0u8; 32];
    }

    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
            .collect();
    }
    level[0]
}

/// Sibling path for `leaves[index]`, or `None` when out of range.
pub fn build_proof(leaves: &[Hash], index: usize) -> Option<Vec<Hash>> {
    if index >= leaves.len() {
        return None;
    }

    let mut proof = Vec::new();
    let mut level = leaves.to_vec();
    let mut index = index;
    while level.len() > 1 {
        let sibling = if index % 2 == 0 {
            *level.get(index + 1).unwrap_or(&level[index])
        } else {
            level[index - 1]
        };
        proof.push(sibling);
        level = level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
            .collect();
        index /= 2;
    }
    Some(proof)
}

/// Fold `leaf` up `path` and compare with `root`.
pub fn verify_proof(leaf: &Hash, index: usize, path: &[Hash], root: &Hash) -> bool {
    let mut current = *leaf;
    let mut index = index;
    for sibling in path {
        current = if index % 2 == 0 {
            hash_pair(&current, sibling)
        } else {
            hash_pair(sibling, &current)
        };
        index /= 2;
    }
    current == *root
}
