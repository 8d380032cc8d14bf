//! The authenticated message envelope and the client-side transport trait.
//!
//! Grounded on the upstream `ecies`-based encrypted-channel idiom, replaced here with the
//! spec's plaintext-plus-signature envelope: `AuthenticatedMessage{payload, signature,
//! hash}`, where `hash` binds the exact bytes signed and `signature` is checked against
//! the claimed sender's registered signing key. `kms-node` supplies the concrete
//! [`SignatureVerifier`] (BN254 precompile-style or ECDSA recovery) and the concrete
//! [`Transport`] (HTTP via `reqwest`); this module only fixes the wire shape and the
//! authentication predicate both sides share.

use async_trait::async_trait;
use ethers::types::Address;
use ethers::utils::keccak256;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::dkg::Dealing;
use crate::error::AuthError;
use crate::operator::{Operator, SigningKey};
use crate::session::{Acknowledgement, CommitmentBroadcast};
use threshold_bls::curve::bls12381::{Scalar, G2};

/// Any payload type carried in an [`AuthenticatedEnvelope`] declares the addressing and
/// session fields §6 requires on every message.
pub trait Addressed {
    fn from_operator_address(&self) -> Address;
    fn to_operator_address(&self) -> Address;
    fn session_timestamp(&self) -> i64;
}

macro_rules! addressed_message {
    ($name:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        #[derive(Debug, Clone, Serialize, serde::Deserialize)]
        pub struct $name {
            pub from_operator_address: Address,
            pub to_operator_address: Address,
            pub session_timestamp: i64,
            $(pub $field: $ty,)*
        }

        impl Addressed for $name {
            fn from_operator_address(&self) -> Address {
                self.from_operator_address
            }
            fn to_operator_address(&self) -> Address {
                self.to_operator_address
            }
            fn session_timestamp(&self) -> i64 {
                self.session_timestamp
            }
        }
    };
}

addressed_message!(CommitmentMessage { epoch: i64, commitments: Vec<G2> });
addressed_message!(ShareMessage { epoch: i64, share: Scalar });
addressed_message!(AckMessage { ack: Acknowledgement });
addressed_message!(BroadcastMessage { broadcast: CommitmentBroadcast });

/// The signed envelope wrapping any of the above payloads: `hash` is
/// `keccak256(bincode(payload))`, `signature` is the sender's signature over `hash`.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct AuthenticatedEnvelope<T> {
    pub payload: T,
    pub signature: Vec<u8>,
    pub hash: [u8; 32],
}

impl<T: Serialize> AuthenticatedEnvelope<T> {
    /// Builds the envelope, computing `hash` and invoking `sign` to produce `signature`
    /// over it.
    pub fn new(payload: T, sign: impl FnOnce(&[u8; 32]) -> Vec<u8>) -> Self {
        let bytes = bincode::serialize(&payload).expect("payload serialization is infallible");
        let hash = keccak256(bytes);
        let signature = sign(&hash);
        Self { payload, signature, hash }
    }
}

/// Verifies a signature against a sender's registered signing key. Implemented by
/// `kms-node` per curve: ECDSA recovery for [`SigningKey::Ecdsa`], a BN254
/// precompile-compatible check for [`SigningKey::Bn254`].
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, signing_key: &SigningKey, hash: &[u8; 32], signature: &[u8]) -> bool;
}

/// The full §6 authentication predicate: the envelope's hash must match its own payload,
/// the signature must verify under the claimed sender's key, and if the payload names a
/// non-zero recipient it must be this node.
pub fn authenticate<T>(
    envelope: &AuthenticatedEnvelope<T>,
    sender_key: &SigningKey,
    local_address: Address,
    verifier: &dyn SignatureVerifier,
) -> Result<(), AuthError>
where
    T: Serialize + Addressed,
{
    let bytes = bincode::serialize(&envelope.payload).map_err(|_| AuthError::HashMismatch)?;
    if keccak256(bytes) != envelope.hash {
        return Err(AuthError::HashMismatch);
    }

    if !verifier.verify(sender_key, &envelope.hash, &envelope.signature) {
        return Err(AuthError::BadSignature);
    }

    let to = envelope.payload.to_operator_address();
    if to != Address::zero() && to != local_address {
        return Err(AuthError::AddresseeMismatch);
    }

    Ok(())
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {0:?} failed: {1}")]
    Request(Address, String),

    #[error("response deserialization failed: {0}")]
    Deserialize(String),
}

/// Outbound peer-to-peer delivery for the four unicast/broadcast message kinds the
/// six-phase protocol sends. A single failed peer send is logged and does not abort the
/// session (§7's "transient transport failure" category) — the caller decides whether the
/// surviving peer count still clears threshold.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_commitment(
        &self,
        to: &Operator,
        envelope: AuthenticatedEnvelope<CommitmentMessage>,
    ) -> Result<(), TransportError>;

    async fn send_share(
        &self,
        to: &Operator,
        envelope: AuthenticatedEnvelope<ShareMessage>,
    ) -> Result<(), TransportError>;

    async fn send_ack(
        &self,
        to: &Operator,
        envelope: AuthenticatedEnvelope<AckMessage>,
    ) -> Result<(), TransportError>;

    async fn send_broadcast(
        &self,
        to: &Operator,
        envelope: AuthenticatedEnvelope<BroadcastMessage>,
    ) -> Result<(), TransportError>;
}

/// Builds the share a dealer sends a specific player, used by the orchestrator when
/// driving Phase 1 — kept here so `Dealing` and the wire message stay in sync.
pub fn build_share_message(
    dealing: &Dealing,
    from: Address,
    to: Address,
    session_timestamp: i64,
    epoch: i64,
    player_node_id: u64,
) -> ShareMessage {
    ShareMessage {
        from_operator_address: from,
        to_operator_address: to,
        session_timestamp,
        epoch,
        share: dealing.share_for(player_node_id),
    }
}

pub fn deserialize_envelope<T: DeserializeOwned>(bytes: &[u8]) -> Result<AuthenticatedEnvelope<T>, TransportError> {
    bincode::deserialize(bytes).map_err(|e| TransportError::Deserialize(e.to_string()))
}
