//! Single-coefficient Lagrange interpolation at `x=0`.
//!
//! [`threshold_bls::poly::Poly::recover`] already computes this internally while summing
//! `y_i * lambda_i(0)` over a share set; resharing finalize (spec's `commitments_out[0] =
//! lambda_self(0, V) * my_commitments[0]`) needs the bare coefficient rather than an
//! interpolated value, so this module extracts the same numerator/denominator loop.

use threshold_bls::group::{Element, Scalar as ScalarTrait};

/// Computes `lambda_i(0)` for participant `i` given the node-id set `participants`,
/// lifting each node-id directly into `Fr` with no index shift — the same direct-evaluation
/// convention [`crate::dkg::eval_at_node_id`] uses, since shares here are dealt at real
/// node-ids rather than small array indices.
pub fn lagrange_coefficient<S: ScalarTrait<RHS = S>>(i: u64, participants: &[u64]) -> S {
    let mut num = S::one();
    let mut den = S::one();

    let xi = scalar_of(i);
    for &j in participants {
        if j == i {
            continue;
        }
        let xj = scalar_of(j);

        // num *= (0 - xj) = -xj
        let mut neg_xj = xj.clone();
        neg_xj.negate();
        num.mul(&neg_xj);

        // den *= (xi - xj)
        let mut diff = xi.clone();
        diff.sub(&xj);
        den.mul(&diff);
    }

    let inv = den.inverse().expect("distinct participant ids are invertible");
    num.mul(&inv);
    num
}

fn scalar_of<S: ScalarTrait<RHS = S>>(node_id: u64) -> S {
    let mut s = S::new();
    // node-ids can exceed u32; fold them into the field via repeated doubling from the
    // high half, matching `set_int`'s u64 domain.
    s.set_int(node_id);
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use threshold_bls::curve::bls12381::Scalar;
    use threshold_bls::poly::{Eval, Poly};

    #[test]
    fn matches_poly_recover() {
        let degree = 3;
        let poly = Poly::<Scalar>::new(degree);
        let secret = poly.get(0);

        let participants: Vec<u64> = vec![0, 1, 2, 3];
        let evals: Vec<Eval<Scalar>> = participants
            .iter()
            .map(|&p| poly.eval(p as u32))
            .collect();

        // sum_i lambda_i(0) * y_i should equal the polynomial's constant term, and should
        // equal what Poly::recover computes via the same loop.
        let node_ids: Vec<u64> = participants.iter().map(|&p| p + 1).collect();
        let mut acc = Scalar::new();
        for (p, e) in node_ids.iter().zip(evals.iter()) {
            let lambda: Scalar = lagrange_coefficient(*p, &node_ids);
            let mut term = e.value.clone();
            term.mul(&lambda);
            acc.add(&term);
        }

        let recovered = Poly::<Scalar>::recover(participants.len(), evals).unwrap();
        assert_eq!(acc, recovered);
        assert_eq!(acc, secret);
    }
}
