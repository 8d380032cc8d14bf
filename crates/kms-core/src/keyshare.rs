//! A durable record of one epoch's key sharing.

use serde::{Deserialize, Serialize};
use threshold_bls::curve::bls12381::{Scalar, G2};

/// A durable record keyed by an epoch timestamp. `commitments[0]` is this node's
/// contribution to the master public key: unscaled after a genesis DKG, scaled by
/// `lambda_self(0, V)` after a reshare finalize (see [`crate::session`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyShareVersion {
    pub epoch: i64,
    pub private_share: Scalar,
    pub commitments: Vec<G2>,
    pub participant_ids: Vec<i64>,
    pub is_active: bool,
}

impl KeyShareVersion {
    pub fn master_public_key_contribution(&self) -> &G2 {
        &self.commitments[0]
    }
}
