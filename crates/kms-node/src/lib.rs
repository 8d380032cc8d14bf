//! Everything `kms-core`'s protocol logic needs to run as a standing service: HTTP
//! transport in both directions (server routes and outbound client), `sled`-backed
//! persistence, an `ethers`-backed on-chain anchoring registry, operator-set peering,
//! node configuration, and the orchestrator that wires them all to the six-phase
//! protocol and the block-boundary scheduler.
//!
//! `kms-core` stays ignorant of all of this; this crate is where the concrete
//! collaborators for its traits live.

pub mod attestation;
pub mod auth;
pub mod config;
pub mod http;
pub mod orchestrator;
pub mod peering;
pub mod persistence;
pub mod registry_eth;
pub mod release;
pub mod secrets;
pub mod signer;
pub mod transport_http;
