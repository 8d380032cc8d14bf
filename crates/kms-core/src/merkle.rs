//! A deterministic binary merkle tree over acknowledgement leaves.
//!
//! Leaves are sorted by `player_id` before construction; odd levels duplicate the last
//! node, matching the spec's "last node is duplicated" rule exactly (not a zero-leaf
//! padding scheme, which would change the root for the same ack set depending on where
//! padding is inserted).

use ethers::utils::keccak256;

use crate::hash::hash_ack_for_merkle;
use crate::session::Acknowledgement;

/// A merkle inclusion proof: sibling hashes from leaf to root, and which side each
/// sibling sits on (`true` = sibling is the right child).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MerkleProof {
    pub leaf: [u8; 32],
    pub siblings: Vec<([u8; 32], bool)>,
}

impl MerkleProof {
    /// Re-derives the root implied by this proof and checks it against `root`.
    pub fn verify(&self, root: &[u8; 32]) -> bool {
        let mut node = self.leaf;
        for (sibling, sibling_is_right) in &self.siblings {
            node = if *sibling_is_right {
                combine(&node, sibling)
            } else {
                combine(sibling, &node)
            };
        }
        &node == root
    }
}

fn combine(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(left);
    buf.extend_from_slice(right);
    keccak256(buf)
}

/// A dealer's merkle tree over the acks it collected for one session, built once all
/// acks are in hand; supports root lookup and per-leaf inclusion proof generation.
pub struct AckMerkleTree {
    /// Levels from leaves (index 0) to root (last index), each a list of node hashes.
    levels: Vec<Vec<[u8; 32]>>,
    /// player_id -> index into the (sorted) leaf level, for proof lookups.
    leaf_index: Vec<(u64, usize)>,
}

impl AckMerkleTree {
    /// Builds the tree from a dealer's collected acks. Acks are sorted by `player_id`
    /// ascending before leaf construction for determinism.
    pub fn build(mut acks: Vec<Acknowledgement>) -> Self {
        acks.sort_by_key(|a| a.player_id);

        let leaf_index = acks.iter().enumerate().map(|(i, a)| (a.player_id, i)).collect();
        let leaves: Vec<[u8; 32]> = acks.iter().map(hash_ack_for_merkle).collect();

        let mut levels = vec![leaves];
        while levels.last().unwrap().len() > 1 {
            let prev = levels.last().unwrap();
            let mut next = Vec::with_capacity(prev.len().div_ceil(2));
            let mut i = 0;
            while i < prev.len() {
                let left = prev[i];
                let right = if i + 1 < prev.len() { prev[i + 1] } else { prev[i] };
                next.push(combine(&left, &right));
                i += 2;
            }
            levels.push(next);
        }

        Self { levels, leaf_index }
    }

    pub fn root(&self) -> [u8; 32] {
        self.levels.last().unwrap()[0]
    }

    /// Builds the inclusion proof for the given player's ack leaf, if present.
    pub fn proof_for(&self, player_id: u64) -> Option<MerkleProof> {
        let mut idx = self
            .leaf_index
            .iter()
            .find(|(p, _)| *p == player_id)
            .map(|(_, i)| *i)?;

        let leaf = self.levels[0][idx];
        let mut siblings = Vec::new();

        for level in &self.levels[..self.levels.len() - 1] {
            let is_right = idx % 2 == 1;
            let sibling_idx = if is_right { idx - 1 } else { usize::min(idx + 1, level.len() - 1) };
            siblings.push((level[sibling_idx], !is_right));
            idx /= 2;
        }

        Some(MerkleProof { leaf, siblings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ack(player_id: u64) -> Acknowledgement {
        Acknowledgement {
            player_id,
            dealer_id: 42,
            epoch: 7,
            share_hash: [player_id as u8; 32],
            commitment_hash: [9u8; 32],
            signature: vec![1, 2, 3],
        }
    }

    #[test]
    fn round_trip_even_count() {
        let acks: Vec<_> = (0..4).map(ack).collect();
        let tree = AckMerkleTree::build(acks.clone());
        let root = tree.root();
        for a in &acks {
            let proof = tree.proof_for(a.player_id).unwrap();
            assert!(proof.verify(&root));
        }
    }

    #[test]
    fn round_trip_odd_count_duplicates_last() {
        let acks: Vec<_> = (0..5).map(ack).collect();
        let tree = AckMerkleTree::build(acks.clone());
        let root = tree.root();
        for a in &acks {
            let proof = tree.proof_for(a.player_id).unwrap();
            assert!(proof.verify(&root));
        }
    }

    #[test]
    fn mutated_leaf_fails() {
        let acks: Vec<_> = (0..4).map(ack).collect();
        let tree = AckMerkleTree::build(acks);
        let root = tree.root();
        let mut proof = tree.proof_for(1).unwrap();
        proof.leaf[0] ^= 0xff;
        assert!(!proof.verify(&root));
    }
}
