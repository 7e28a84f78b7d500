//! Binary Merkle tree over erasure coded shards.
//!
//! Leaves and inner nodes are hashed with distinct prefixes so a leaf can never be passed off as
//! an inner node. When a level has an odd number of nodes the last one is carried up unchanged.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utilities::hash::{HashType, Hasher};

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MerkleError {
    #[error("Cannot build a Merkle tree without leaves")]
    NoLeaves,
}

/// Authentication path for one leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub root: HashType,
    pub path: Vec<HashType>,
    pub index: usize,
    pub leaf_count: usize,
}

impl MerkleProof {
    pub fn verify(&self, leaf: &[u8]) -> bool {
        Merkle::verify(&self.root, leaf, &self.path, self.index, self.leaf_count)
    }
}

pub(crate) struct Merkle;

impl Merkle {
    /// Builds the tree and returns the root together with one proof per leaf, in leaf order.
    pub(crate) fn build<L: AsRef<[u8]>>(
        leaves: &[L],
    ) -> Result<(HashType, Vec<MerkleProof>), MerkleError> {
        if leaves.is_empty() {
            return Err(MerkleError::NoLeaves);
        }
        let leaf_count = leaves.len();

        let mut levels: Vec<Vec<HashType>> =
            vec![leaves.iter().map(|l| Self::hash_leaf(l.as_ref())).collect()];
        while levels.last().map_or(0, Vec::len) > 1 {
            let current = levels.last().map(Vec::as_slice).unwrap_or_default();
            let next: Vec<HashType> = current
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => Self::hash_node(left, right),
                    _ => pair[0],
                })
                .collect();
            levels.push(next);
        }
        let root = levels
            .last()
            .and_then(|top| top.first().copied())
            .ok_or(MerkleError::NoLeaves)?;

        let proofs = (0..leaf_count)
            .map(|index| {
                let mut path = vec![];
                let mut position = index;
                for level in &levels[..levels.len() - 1] {
                    let sibling = position ^ 1;
                    if sibling < level.len() {
                        path.push(level[sibling]);
                    }
                    position /= 2;
                }
                MerkleProof {
                    root,
                    path,
                    index,
                    leaf_count,
                }
            })
            .collect();

        Ok((root, proofs))
    }

    /// Recomputes the root from `leaf` and `path` and compares it with `root`.
    ///
    /// The path must have exactly the length implied by `index` and `leaf_count`.
    pub(crate) fn verify(
        root: &HashType,
        leaf: &[u8],
        path: &[HashType],
        index: usize,
        leaf_count: usize,
    ) -> bool {
        if index >= leaf_count {
            return false;
        }
        let mut hash = Self::hash_leaf(leaf);
        let mut position = index;
        let mut width = leaf_count;
        let mut siblings = path.iter();

        while width > 1 {
            let promoted = position == width - 1 && width % 2 == 1;
            if !promoted {
                let Some(sibling) = siblings.next() else {
                    return false;
                };
                hash = if position % 2 == 0 {
                    Self::hash_node(&hash, sibling)
                } else {
                    Self::hash_node(sibling, &hash)
                };
            }
            position /= 2;
            width = (width + 1) / 2;
        }

        siblings.next().is_none() && &hash == root
    }

    fn hash_leaf(data: &[u8]) -> HashType {
        let mut hasher = Hasher::default();
        hasher.update([LEAF_PREFIX]).update(data);
        hasher.finish()
    }

    fn hash_node(left: &HashType, right: &HashType) -> HashType {
        let mut hasher = Hasher::default();
        hasher.update([NODE_PREFIX]).update(left).update(right);
        hasher.finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn leaves(n: usize) -> Vec<Vec<u8>> {
        (0..n).map(|i| vec![i as u8; 8]).collect()
    }

    #[test]
    fn test_every_leaf_verifies() {
        for n in 1..=9 {
            let leaves = leaves(n);
            let (root, proofs) = Merkle::build(&leaves).unwrap();
            assert_eq!(proofs.len(), n);
            for (i, proof) in proofs.iter().enumerate() {
                assert_eq!(proof.root, root);
                assert!(proof.verify(&leaves[i]), "leaf {i} of {n}");
            }
        }
    }

    #[test]
    fn test_tampered_leaf_rejected() {
        let leaves = leaves(4);
        let (_, proofs) = Merkle::build(&leaves).unwrap();
        assert!(!proofs[1].verify(&leaves[2]));
        assert!(!proofs[1].verify(b"forged"));
    }

    #[test]
    fn test_tampered_path_rejected() {
        let leaves = leaves(5);
        let (_, proofs) = Merkle::build(&leaves).unwrap();

        let mut proof = proofs[2].clone();
        proof.path[0] = HashType::new([9; 32]);
        assert!(!proof.verify(&leaves[2]));

        let mut proof = proofs[2].clone();
        proof.path.push(HashType::new([9; 32]));
        assert!(!proof.verify(&leaves[2]));

        let mut proof = proofs[2].clone();
        proof.path.pop();
        assert!(!proof.verify(&leaves[2]));
    }

    #[test]
    fn test_tampered_index_rejected() {
        let leaves = leaves(4);
        let (_, proofs) = Merkle::build(&leaves).unwrap();

        let mut proof = proofs[0].clone();
        proof.index = 1;
        assert!(!proof.verify(&leaves[0]));

        let mut proof = proofs[3].clone();
        proof.index = 4;
        assert!(!proof.verify(&leaves[3]));
    }

    #[test]
    fn test_leaf_count_mismatch_rejected() {
        let leaves = leaves(5);
        let (_, proofs) = Merkle::build(&leaves).unwrap();
        let mut proof = proofs[4].clone();
        proof.leaf_count = 6;
        assert!(!proof.verify(&leaves[4]));
    }

    #[test]
    fn test_single_leaf_root_is_leaf_hash() {
        let (root, proofs) = Merkle::build(&[b"only".to_vec()]).unwrap();
        assert!(proofs[0].path.is_empty());
        assert_eq!(root, Merkle::hash_leaf(b"only"));
    }

    #[test]
    fn test_no_leaves() {
        let empty: Vec<Vec<u8>> = vec![];
        assert_eq!(Merkle::build(&empty).unwrap_err(), MerkleError::NoLeaves);
    }
}
