//! keccak256-based hashing helpers for commitments, shares, and acknowledgement leaves.
//!
//! Grounded on the upstream library's own bincode-then-hash idiom (`ecies::derive`'s use of
//! a domain-separated KDF); here the hash is keccak256 throughout, matching the on-chain
//! registry and merkle-tree conventions the rest of the protocol relies on.

use ethers::utils::keccak256;
use threshold_bls::curve::bls12381::{Scalar, G2};

use crate::session::Acknowledgement;

/// keccak256 of the concatenated compressed `G2` commitment encodings.
pub fn hash_commitment(commitments: &[G2]) -> [u8; 32] {
    let mut buf = Vec::new();
    for c in commitments {
        buf.extend_from_slice(&bincode::serialize(c).expect("G2 serialization is infallible"));
    }
    keccak256(buf)
}

/// keccak256 of the compressed scalar encoding of a share.
pub fn hash_share(share: &Scalar) -> [u8; 32] {
    let buf = bincode::serialize(share).expect("Scalar serialization is infallible");
    keccak256(buf)
}

/// keccak256 over the fixed layout `(player_id, dealer_id, epoch, share_hash, commitment_hash)`.
/// The signature is deliberately excluded: Phase 4 recipients verify this leaf against an
/// on-chain anchored root, and ack signatures are never replayed to peers.
pub fn hash_ack_for_merkle(ack: &Acknowledgement) -> [u8; 32] {
    let mut buf = Vec::with_capacity(8 + 8 + 8 + 32 + 32);
    buf.extend_from_slice(&ack.player_id.to_be_bytes());
    buf.extend_from_slice(&ack.dealer_id.to_be_bytes());
    buf.extend_from_slice(&ack.epoch.to_be_bytes());
    buf.extend_from_slice(&ack.share_hash);
    buf.extend_from_slice(&ack.commitment_hash);
    keccak256(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use threshold_bls::group::Element;

    #[test]
    fn hash_commitment_is_order_sensitive() {
        let a = G2::rand(&mut rand::thread_rng());
        let b = G2::rand(&mut rand::thread_rng());
        assert_ne!(hash_commitment(&[a.clone(), b.clone()]), hash_commitment(&[b, a]));
    }

    #[test]
    fn ack_hash_excludes_signature() {
        let ack = Acknowledgement {
            player_id: 1,
            dealer_id: 2,
            epoch: 100,
            share_hash: [1u8; 32],
            commitment_hash: [2u8; 32],
            signature: vec![9, 9, 9],
        };
        let mut other = ack.clone();
        other.signature = vec![1];
        assert_eq!(hash_ack_for_merkle(&ack), hash_ack_for_merkle(&other));
    }
}
