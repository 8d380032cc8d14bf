//! Core protocol logic for the key management network: operator/group modelling,
//! key-share versions, the six-phase DKG/resharing state machine, merkle-anchored
//! acknowledgements, the scheduler, and the keystore.
//!
//! `kms-core` holds no transport or persistence implementation; it exposes the
//! boundary traits (`CommitmentRegistry`, `Transport`) that `kms-node` wires up to an
//! on-chain registry and HTTP. `kms-node` defines and implements its own `Persistence`
//! trait over `sled`, since nothing here needs to read or write it directly.

pub mod client;
pub mod dkg;
pub mod error;
pub mod hash;
pub mod keyshare;
pub mod keystore;
pub mod lagrange;
pub mod merkle;
pub mod operator;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod transport;

pub use threshold_bls::curve::bls12381::{PairingCurve, Scalar, G1, G2};

/// The signature scheme used for threshold application-key derivation: public keys
/// (master / operator) live in `G2`, partial signatures and the recovered
/// application private key live in `G1`.
pub type SigScheme = threshold_bls::schemes::bls12_381::G2Scheme;
