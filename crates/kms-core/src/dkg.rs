//! Polynomial dealing and verification for Pedersen DKG and proactive resharing.
//!
//! The upstream library evaluates shares at small array indices via
//! [`threshold_bls::poly::Poly::eval`] (which internally shifts by one so the secret at `x=0`
//! is never evaluated). This protocol instead evaluates directly at each operator's 64-bit
//! node-id, per spec: `f(j) = sum_k a_k * j^k`. That direct-evaluation convention is what
//! this module implements, reusing `Poly`'s storage and `commit` but not its `eval`/`recover`.

use rand_core::RngCore;
use threshold_bls::group::{Element, Scalar as ScalarTrait};
use threshold_bls::poly::{Idx, Poly};

use crate::operator::node_id;
use threshold_bls::curve::bls12381::{Scalar, G2};

/// A freshly sampled dealing polynomial, with `a_0` either random (genesis DKG) or the
/// dealer's current private share (reshare as an existing holder).
pub struct Dealing {
    poly: Poly<Scalar>,
}

impl Dealing {
    /// Genesis DKG: `a_0` random, degree `threshold - 1`.
    pub fn genesis<R: RngCore>(threshold: usize, rng: &mut R) -> Self {
        Self {
            poly: Poly::new_from(threshold - 1, rng),
        }
    }

    /// Reshare as an existing holder: `a_0` fixed to the current private share, remaining
    /// coefficients random. This enforces resharing-in-place: the constant term carries
    /// forward unchanged, only the sharing polynomial around it is refreshed.
    pub fn reshare<R: RngCore>(threshold: usize, current_share: Scalar, rng: &mut R) -> Self {
        let mut poly = Poly::new_from(threshold - 1, rng);
        poly.set(0, current_share);
        Self { poly }
    }

    /// The share this dealer keeps for itself (node-id of the local operator).
    pub fn share_for(&self, node_id: u64) -> Scalar {
        eval_at_node_id(&self.poly, node_id)
    }

    /// Public commitments `C_k = a_k * g2` for `k = 0..threshold-1`.
    pub fn commitments(&self) -> Vec<G2> {
        self.poly.commit::<G2>().into()
    }
}

/// Evaluates a scalar polynomial directly at `x = node_id` (no index shift), via
/// repeated-squaring-free linear exponentiation — degree is bounded by the operator
/// count, so this stays cheap.
pub fn eval_at_node_id(poly: &Poly<Scalar>, node_id: u64) -> Scalar {
    let x = scalar_from_node_id(node_id);
    let degree = poly.degree();

    let mut acc = poly.get(0);
    let mut xi = Scalar::one();
    for k in 1..=degree as Idx {
        xi.mul(&x);
        let mut term = poly.get(k);
        term.mul(&xi);
        acc.add(&term);
    }
    acc
}

pub fn scalar_from_node_id(node_id: u64) -> Scalar {
    let mut s = Scalar::new();
    s.set_int(node_id);
    s
}

/// Evaluates a dealer's public commitment polynomial at `node_id`: `sum_k C_k * node_id^k`.
/// This is the public counterpart of [`eval_at_node_id`] and also doubles as the public
/// key against which that operator's partial application-key signatures verify (§4.7):
/// the same evaluation that binds a private share to its commitments binds a BLS key pair.
pub fn eval_g2_commitments_at_node_id(commitments: &[G2], node_id: u64) -> G2 {
    let x = scalar_from_node_id(node_id);
    let mut acc = commitments[0].clone();
    let mut xi = Scalar::one();
    for c in commitments.iter().skip(1) {
        xi.mul(&x);
        let mut term = c.clone();
        term.mul(&xi);
        acc.add(&term);
    }
    acc
}

/// Verifies a share `s_j` received from a dealer against that dealer's public
/// commitments: `s_j * g2 == sum_k C_k * j^k`, equality in `G2`.
pub fn share_correct(receiver_node_id: u64, share: &Scalar, commitments: &[G2]) -> bool {
    let mut lhs = G2::one();
    lhs.mul(share);

    let rhs = eval_g2_commitments_at_node_id(commitments, receiver_node_id);

    lhs == rhs
}

/// Derives the local operator's share from its own address, for convenience at call sites
/// that only have an `Address`.
pub fn share_for_address(dealing: &Dealing, address: ethers::types::Address) -> Scalar {
    dealing.share_for(node_id(address))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::thread_rng;

    #[test]
    fn genesis_share_verifies() {
        let dealing = Dealing::genesis(3, &mut thread_rng());
        let commitments = dealing.commitments();
        for node in [11u64, 2024, u64::MAX / 3] {
            let share = dealing.share_for(node);
            assert!(share_correct(node, &share, &commitments));
        }
    }

    #[test]
    fn tampered_share_fails() {
        let dealing = Dealing::genesis(3, &mut thread_rng());
        let commitments = dealing.commitments();
        let mut share = dealing.share_for(7);
        share.add(&Scalar::one());
        assert!(!share_correct(7, &share, &commitments));
    }

    #[test]
    fn reshare_preserves_constant_term() {
        let secret = Scalar::rand(&mut thread_rng());
        let dealing = Dealing::reshare(3, secret.clone(), &mut thread_rng());
        assert_eq!(dealing.poly.get(0), secret);
    }
}
