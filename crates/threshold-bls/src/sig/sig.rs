use crate::{
    group::{Element, Point, Scalar},
    poly::{Idx, Poly},
};
use rand_core::RngCore;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{error::Error, fmt::Debug};

/// A partial signature, serialized together with the index of the share that produced it.
pub type Partial = Vec<u8>;

/// Index of a share in a threshold scheme; re-exported from the polynomial module since
/// shares are just polynomial evaluations.
pub type Index = Idx;

/// A share of a private key, tagged with the index at which it was evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share<S> {
    pub index: Index,
    pub private: S,
}

/// The `Scheme` trait contains the basic information of the groups over
/// which the signing operations takes places and a way to create a valid key
/// pair.
///
/// The Scheme trait is necessary to implement for "simple" signature scheme as
/// well for threshold based signature scheme.
pub trait Scheme: Debug {
    /// `Private` represents the field over which private keys are represented.
    type Private: Scalar<RHS = Self::Private>;
    /// `Public` represents the group over which the public keys are
    /// represented.
    type Public: Point<RHS = Self::Private> + Serialize + DeserializeOwned;
    /// `Signature` represents the group over which the signatures are reresented.
    type Signature: Point<RHS = Self::Private> + Serialize + DeserializeOwned;

    /// Returns a new fresh keypair usable by the scheme.
    fn keypair<R: RngCore>(rng: &mut R) -> (Self::Private, Self::Public) {
        let private = Self::Private::rand(rng);

        let mut public = Self::Public::one();
        public.mul(&private);

        (private, public)
    }
}

/// SignatureScheme is the trait that defines the operations of a signature
/// scheme, namely `sign` and `verify`.
///
/// ```
///  use rand::prelude::*;
///  use threshold_bls::{sig::{SignatureScheme, Scheme, G2Scheme}, group::{Element, Point}};
///  use threshold_bls::curve::bls12381::PairingCurve as PC;
///
///  let msg = vec![1,9,6,9];
///  let (private,public) = G2Scheme::<PC>::keypair(&mut thread_rng());
///  let signature = G2Scheme::<PC>::sign(&private,&msg).unwrap();
///  match G2Scheme::<PC>::verify(&public, &msg, &signature) {
///     Ok(_) => println!("signature is correct!"),
///     Err(e) => println!("signature is invalid: {}",e),
///  };
/// ```
/// Note signature scheme handles the format of the signature itself.
pub trait SignatureScheme: Scheme {
    /// Error produced when signing a message
    type Error: Error;

    /// Signs the message with the provided private key and returns a serialized signature
    fn sign(private: &Self::Private, msg: &[u8]) -> Result<Vec<u8>, Self::Error>;

    /// Verifies that the signature on the provided message was produced by the public key
    fn verify(public: &Self::Public, msg: &[u8], sig: &[u8]) -> Result<(), Self::Error>;
}

/// Extension trait over `SignatureScheme` which provides signing & verification methods
/// which do not hash the message.
pub trait SignatureSchemeExt: SignatureScheme {
    /// Signs the message with the provided private key and returns a serialized signature. This
    /// method **will not** hash the message before signing it.
    fn sign_without_hashing(private: &Self::Private, msg: &[u8]) -> Result<Vec<u8>, Self::Error>;

    /// Verifies that the signature on the provided message was produced by the public key.
    /// This method **will not** hash the message.
    fn verify_without_hashing(
        public: &Self::Public,
        msg: &[u8],
        sig: &[u8],
    ) -> Result<(), Self::Error>;
}

/// ThresholdScheme is a threshold-based `t-n` signature scheme. At least `t` participants
/// must each produce a "partial signature" over a message; any `t` of them interpolate into
/// a regular signature verifiable against the group's public key.
pub trait ThresholdScheme: Scheme {
    /// Error produced when partially signing, aggregating or verifying
    type Error: Error;

    /// Partially signs a message with a share of the private key
    fn partial_sign(private: &Share<Self::Private>, msg: &[u8]) -> Result<Partial, Self::Error>;

    /// Verifies a partial signature on a message against the public polynomial
    fn partial_verify(
        public: &Poly<Self::Public>,
        msg: &[u8],
        partial: &[u8],
    ) -> Result<(), Self::Error>;

    /// Aggregates all partial signatures together via Lagrange interpolation. This method does
    /// not verify that the partial signatures are correct; it only aggregates them.
    fn aggregate(threshold: usize, partials: &[Partial]) -> Result<Vec<u8>, Self::Error>;

    /// Verifies a threshold signature on a message against the public key which corresponds
    /// to the public polynomial of the shares that produced the partial signatures
    fn verify(public: &Self::Public, msg: &[u8], sig: &[u8]) -> Result<(), Self::Error>;
}

/// Extension trait over `ThresholdScheme` which provides partial signing & verification methods
/// which do not hash the message.
pub trait ThresholdSchemeExt: ThresholdScheme {
    fn partial_sign_without_hashing(
        private: &Share<Self::Private>,
        msg: &[u8],
    ) -> Result<Partial, Self::Error>;

    fn partial_verify_without_hashing(
        public: &Poly<Self::Public>,
        msg: &[u8],
        partial: &[u8],
    ) -> Result<(), Self::Error>;
}
