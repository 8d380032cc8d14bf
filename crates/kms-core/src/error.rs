//! Error taxonomy. Each boundary of the system gets its own `thiserror` enum,
//! mirroring the way the upstream DKG library separates `DKGError`/`ShareError` (protocol
//! math) from `NodeError` (orchestration): here the boundaries are configuration,
//! authentication, protocol execution, and persistence/anchoring.

use thiserror::Error;

/// Fatal at startup: bad configuration, invalid chain id, node-id collision.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration value: {0}")]
    Missing(&'static str),

    #[error("invalid chain id: {0}")]
    InvalidChainId(u64),

    #[error("duplicate operator address: {0}")]
    DuplicateAddress(String),

    #[error("node-id collision between {0} and {1}: {2:#x}")]
    NodeIdCollision(String, String, u64),

    #[error("invalid threshold {0} for {1} operators (min {2}, max {3})")]
    InvalidThreshold(usize, usize, usize, usize),

    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Returned from the HTTP layer as 401; never affects the session.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("envelope hash does not match payload")]
    HashMismatch,

    #[error("signature verification failed")]
    BadSignature,

    #[error("unknown sender address")]
    UnknownSender,

    #[error("message addressed to a different operator")]
    AddresseeMismatch,
}

/// Cryptographic invalidity is logged as a structured complaint (see
/// [`crate::session::ComplaintEvent`]) rather than returned as a hard error, unless the
/// surviving set drops below threshold, in which case it folds into a [`ProtocolError`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("share from dealer {0} failed verification against its commitments")]
    InvalidShare(u64),

    #[error("acknowledgement signature from player {0} is invalid")]
    InvalidAckSignature(u64),

    #[error("merkle inclusion proof is invalid")]
    InvalidMerkleProof,

    #[error("commitment hash does not match the anchored value")]
    CommitmentMismatch,
}

/// Failures that abort a running protocol session. The session is deleted from
/// persistence on any of these.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("deadline exceeded waiting for {0}")]
    Timeout(&'static str),

    #[error("only {0}/{1} valid dealer shares, below threshold")]
    NotEnoughValidShares(usize, usize),

    #[error("on-chain anchoring failed after exhausting retries: {0}")]
    AnchorFailure(#[from] AnchorError),

    #[error("persistence failure: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("crypto error escalated to session abort: {0}")]
    Crypto(#[from] CryptoError),

    #[error("session {0} already exists")]
    DuplicateSession(i64),

    #[error("session {0} not found")]
    SessionNotFound(i64),
}

#[derive(Debug, Error)]
pub enum AnchorError {
    #[error("registry call failed: {0}")]
    Registry(String),

    #[error("retries exhausted after {0} attempts")]
    RetriesExhausted(u32),

    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("(de)serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}
