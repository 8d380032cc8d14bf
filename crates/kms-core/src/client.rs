//! Threshold application-key derivation (§4.7): IBE-style key issuance reusing the BLS
//! signature scheme, where "signing" `app_id` under the master secret key produces exactly
//! the application private key a client needs.
//!
//! [`threshold_bls::sig::tbls`] ships its own `ThresholdScheme::aggregate`, but its
//! Lagrange recovery always evaluates participants at `small_index + 1`
//! ([`threshold_bls::poly::Poly::recover`]'s fixed convention) — incompatible with this
//! protocol's shares, which are dealt directly at each operator's 64-bit node-id
//! ([`crate::dkg`]). This module reuses `SigScheme::sign`/`verify` for the BLS math itself
//! but recombines partials with [`crate::lagrange::lagrange_coefficient`] against the real
//! node-id set instead.

use thiserror::Error;

use crate::dkg::eval_g2_commitments_at_node_id;
use crate::lagrange::lagrange_coefficient;
use crate::SigScheme;
use threshold_bls::curve::bls12381::{Scalar, G1, G2};
use threshold_bls::group::Element;
use threshold_bls::sig::{BLSError, SignatureScheme};

/// Node-side: produces this node's partial application-key signature,
/// `hash_to_G1(app_id) * private_share`. A node only ever produces this for itself — it
/// never reconstructs `app_sk`.
pub fn partial_sign(private_share: &Scalar, app_id: &[u8]) -> Result<Vec<u8>, BLSError> {
    SigScheme::sign(private_share, app_id)
}

/// Verifies a partial against the dealing operator's node-id and public commitments,
/// before a client folds it into [`recover_app_sk`].
pub fn partial_verify(
    dealer_node_id: u64,
    dealer_commitments: &[G2],
    app_id: &[u8],
    partial: &[u8],
) -> Result<(), BLSError> {
    let public_i = eval_g2_commitments_at_node_id(dealer_commitments, dealer_node_id);
    SigScheme::verify(&public_i, app_id, partial)
}

#[derive(Debug, Error)]
pub enum AppKeyError {
    #[error("failed to deserialize partial: {0}")]
    Deserialize(#[from] bincode::Error),

    #[error("not enough partials: {0}/{1}")]
    NotEnoughPartials(usize, usize),
}

/// Client-side: recovers `app_sk = hash_to_G1(app_id) * master_secret` from at least
/// `threshold` partials, each tagged with the node-id of the operator that produced it.
/// Every partial in `partials` is used, so the caller must pass a single consistent
/// threshold-sized (or larger, up to the full node-id set) subset — mixing coefficients
/// from different subsets silently produces a wrong key.
pub fn recover_app_sk(threshold: usize, partials: &[(u64, Vec<u8>)]) -> Result<G1, AppKeyError> {
    if partials.len() < threshold {
        return Err(AppKeyError::NotEnoughPartials(partials.len(), threshold));
    }

    let node_ids: Vec<u64> = partials.iter().map(|(id, _)| *id).collect();
    let mut acc = G1::new();
    for (node_id, bytes) in partials {
        let point: G1 = bincode::deserialize(bytes)?;
        let lambda: Scalar = lagrange_coefficient(*node_id, &node_ids);
        let mut term = point;
        term.mul(&lambda);
        acc.add(&term);
    }

    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dkg::Dealing;
    use rand::thread_rng;

    #[test]
    fn recovered_app_sk_matches_direct_signature() {
        let threshold = 3;
        let dealing = Dealing::genesis(threshold, &mut thread_rng());
        let commitments = dealing.commitments();
        let node_ids: Vec<u64> = vec![11, 22, 33, 44];

        let app_id = b"app-under-test";
        let partials: Vec<(u64, Vec<u8>)> = node_ids
            .iter()
            .take(threshold)
            .map(|&id| {
                let share = dealing.share_for(id);
                let partial = partial_sign(&share, app_id).unwrap();
                partial_verify(id, &commitments, app_id, &partial).unwrap();
                (id, partial)
            })
            .collect();

        let recovered = recover_app_sk(threshold, &partials).unwrap();

        // The polynomial's constant term is exactly `share_for(0)`: every higher-degree
        // term vanishes when evaluated at `x = 0`.
        let master_secret = dealing.share_for(0);
        let direct = SigScheme::sign(&master_secret, app_id).unwrap();
        let direct_point: G1 = bincode::deserialize(&direct).unwrap();

        assert_eq!(recovered, direct_point);
    }
}
