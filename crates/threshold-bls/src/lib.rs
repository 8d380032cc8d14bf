//! BLS12-381 curve primitives, polynomial secret sharing and Lagrange interpolation, and
//! BLS signature / threshold-signature schemes, used throughout the key management core for
//! distributed key generation, proactive resharing, and threshold application-key signing.
//!
//! ## Normal BLS Signatures
//!
//! ```rust
//! use threshold_bls::{
//!     schemes::bls12_381::G1Scheme as SigScheme,
//!     sig::{Scheme, SignatureScheme}
//! };
//!
//! let (private, public) = SigScheme::keypair(&mut rand::thread_rng());
//! let msg = b"hello";
//! let sig = SigScheme::sign(&private, &msg[..]).unwrap();
//! SigScheme::verify(&public, &msg[..], &sig).expect("signature should be verified");
//! ```
//!
//! ## Threshold Signatures
//!
//! First a threshold keypair must be generated using [polynomials](poly). Each share then
//! signs the message to produce a partial signature; once `threshold` partials are produced,
//! they can be aggregated into a regular signature verifiable against the threshold public key.
//!
//! ```rust
//! use threshold_bls::{
//!     poly::{Poly, Idx},
//!     schemes::bls12_381::G2Scheme as SigScheme,
//!     sig::{Scheme, SignatureScheme, ThresholdScheme, Share}
//! };
//!
//! let (n, t) = (5, 3);
//! let private_poly = Poly::<<SigScheme as Scheme>::Private>::new(t - 1);
//!
//! let shares = (0..n)
//!     .map(|i| {
//!         let eval = private_poly.eval(i as Idx);
//!         Share {
//!             index: eval.index,
//!             private: eval.value,
//!         }
//!     })
//!     .collect::<Vec<_>>();
//!
//! let public_poly = private_poly.commit();
//! let threshold_public_key = public_poly.public_key();
//!
//! let msg = b"hello";
//! let partials = shares
//!     .iter()
//!     .map(|s| SigScheme::partial_sign(s, &msg[..]).unwrap())
//!     .collect::<Vec<_>>();
//!
//! partials.iter().for_each(|partial| {
//!     SigScheme::partial_verify(&public_poly, &msg[..], partial).unwrap();
//! });
//!
//! let threshold_sig = SigScheme::aggregate(t, &partials).unwrap();
//!
//! SigScheme::verify(
//!     threshold_public_key,
//!     &msg[..],
//!     &threshold_sig
//! ).unwrap();
//! ```
//!
//! `G1Scheme` and `G2Scheme` can be swapped for one another depending on which group keys and
//! signatures should live in. The key management core uses `G2Scheme`: operator/master public
//! keys live in `G2`, and partial signatures over an application id (and the recovered
//! application private key) live in `G1`, obtained via a standards-conformant hash-to-curve.

/// Curve implementation for the traits defined in the [`group`] module.
pub mod curve;

/// Definitions of generic traits with scalars of prime fields and points on elliptic curves.
pub mod group;

/// Polynomial arithmetic suitable for secret sharing and DKG protocols: evaluation,
/// commitment, and Lagrange-based interpolation/recovery of private and public shares.
pub mod poly;

/// BLS signature implementations, plain and threshold.
pub mod sig;

/// Pre-instantiated signature schemes for BLS12-381.
pub mod schemes {
    use crate::sig::{G1Scheme, G2Scheme};

    pub mod bls12_381 {
        use crate::curve::bls12381::PairingCurve;
        pub use crate::curve::bls12381::{G1Curve, G2Curve};

        /// Public Keys on G1, Signatures on G2
        pub type G1Scheme = super::G1Scheme<PairingCurve>;
        /// Public Keys on G2, Signatures on G1
        pub type G2Scheme = super::G2Scheme<PairingCurve>;
    }
}
