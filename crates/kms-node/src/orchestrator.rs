//! Wires every boundary trait (transport, registry, persistence, signature verification,
//! peering) into the six-phase protocol run loop of §4.3, plus the scheduler-driven session
//! lifecycle of §4.5. This is the one place that knows about all of `kms-core`'s pieces at
//! once; `kms-core` itself stays ignorant of HTTP, `sled`, and `ethers`.

use std::sync::Arc;
use std::time::Duration;

use ethers::types::Address;
use rand::thread_rng;
use tokio_util::sync::CancellationToken;

use kms_core::dkg::Dealing;
use kms_core::error::{AuthError, ProtocolError};
use kms_core::hash::hash_commitment;
use kms_core::keystore::KeyStore;
use kms_core::keyshare::KeyShareVersion;
use kms_core::operator::{Operator, OperatorSet};
use kms_core::registry::{submit_with_retry, Anchor, CommitmentRegistry};
use kms_core::scheduler::decide_role;
use kms_core::session::{CommitmentBroadcast, Phase, ProtocolSession, SessionHandle, SessionKind, SessionMap};
use kms_core::transport::{
    authenticate, build_share_message, AckMessage, Addressed, AuthenticatedEnvelope, BroadcastMessage,
    CommitmentMessage, ShareMessage, SignatureVerifier, Transport,
};
use crate::peering::{network_has_prior_epoch, OperatorDirectory, PeerProbe};
use crate::persistence::Persistence;
use crate::signer::LocalSigner;

/// How often Phase 5's best-effort wait re-checks the verified-broadcast count. There is no
/// `Notify` for this on [`SessionHandle`] (§4.3 Phase 5 is explicitly "does not abort" on
/// timeout, so a cheap poll is preferable to adding a fourth completion latch to kms-core's
/// session state for a wait that isn't actually blocking anything downstream).
const BROADCAST_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("no session for timestamp {0}")]
    NoSession(i64),

    #[error("anchor not yet available for dealer {0} at epoch {1}")]
    AnchorUnavailable(u64, i64),

    #[error(transparent)]
    Anchor(#[from] kms_core::error::AnchorError),

    #[error("broadcast failed verification")]
    BroadcastInvalid,
}

/// Every boundary collaborator the protocol run loop and HTTP handlers need, constructed
/// once at startup and shared behind an `Arc` by `kms-node`'s binaries.
pub struct Orchestrator {
    pub local_address: Address,
    pub local_node_id: u64,
    pub sessions: SessionMap,
    pub keystore: Arc<KeyStore>,
    pub persistence: Arc<dyn Persistence>,
    pub registry: Arc<dyn CommitmentRegistry>,
    pub transport: Arc<dyn Transport>,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub signer: Arc<LocalSigner>,
    pub directory: Arc<dyn OperatorDirectory>,
    pub peer_probe: Arc<dyn PeerProbe>,
    pub cancellation: CancellationToken,
    pub protocol_timeout: Duration,
    pub session_wait_timeout: Duration,
}

impl Orchestrator {
    /// Looks up the operator entry a message claims to be from, out of the whole network
    /// roster (not just a single session's dealer set — acks and broadcasts can arrive from
    /// joiners who never deal).
    fn lookup_sender(&self, address: Address) -> Option<Operator> {
        self.directory.current_operators().operators().iter().find(|o| o.address == address).cloned()
    }

    fn authenticate_envelope<T>(&self, envelope: &AuthenticatedEnvelope<T>) -> Result<(), IngestError>
    where
        T: serde::Serialize + Addressed,
    {
        let sender = self
            .lookup_sender(envelope.payload.from_operator_address())
            .ok_or(IngestError::Auth(AuthError::UnknownSender))?;
        authenticate(envelope, &sender.signing_key, self.local_address, self.verifier.as_ref())?;
        Ok(())
    }

    async fn session_for(&self, timestamp: i64) -> Result<Arc<SessionHandle>, IngestError> {
        self.sessions
            .wait_for_entry(timestamp, self.session_wait_timeout)
            .await
            .ok_or(IngestError::NoSession(timestamp))
    }

    /// Handles an inbound `/dkg/commitment` (or `/reshare/commitment`) delivery.
    pub async fn ingest_commitment(&self, envelope: AuthenticatedEnvelope<CommitmentMessage>) -> Result<(), IngestError> {
        self.authenticate_envelope(&envelope)?;
        let handle = self.session_for(envelope.payload.session_timestamp).await?;
        let dealer_id = kms_core::operator::node_id(envelope.payload.from_operator_address);

        let complete = {
            let mut session = handle.state.write().await;
            session.record_commitments(dealer_id, envelope.payload.commitments);
            session.commitments_complete()
        };
        if complete {
            handle.completion.commitments_complete.fire();
        }
        Ok(())
    }

    /// Handles an inbound `/dkg/share` (or `/reshare/share`) delivery.
    pub async fn ingest_share(&self, envelope: AuthenticatedEnvelope<ShareMessage>) -> Result<(), IngestError> {
        self.authenticate_envelope(&envelope)?;
        let handle = self.session_for(envelope.payload.session_timestamp).await?;
        let dealer_id = kms_core::operator::node_id(envelope.payload.from_operator_address);

        let complete = {
            let mut session = handle.state.write().await;
            session.record_share(dealer_id, envelope.payload.share);
            session.shares_complete()
        };
        if complete {
            handle.completion.shares_complete.fire();
        }
        Ok(())
    }

    /// Handles an inbound `/dkg/ack` (or `/reshare/ack`) delivery, addressed to this node as
    /// the dealer that is owed the acknowledgement.
    pub async fn ingest_ack(&self, envelope: AuthenticatedEnvelope<AckMessage>) -> Result<(), IngestError> {
        self.authenticate_envelope(&envelope)?;
        let handle = self.session_for(envelope.payload.session_timestamp).await?;

        let complete = {
            let mut session = handle.state.write().await;
            session.record_ack(envelope.payload.ack);
            session.acks_for_me_count() >= session.n()
        };
        if complete {
            handle.completion.acks_complete.fire();
        }
        Ok(())
    }

    /// Handles an inbound `/dkg/broadcast` (or `/reshare/broadcast`) delivery: fetches the
    /// dealer's anchored commitment hash and ack-merkle-root, then verifies the broadcast
    /// against them (§4.3 Phase 4).
    pub async fn ingest_broadcast(&self, envelope: AuthenticatedEnvelope<BroadcastMessage>) -> Result<(), IngestError> {
        self.authenticate_envelope(&envelope)?;
        let handle = self.session_for(envelope.payload.session_timestamp).await?;
        let broadcast = envelope.payload.broadcast;

        let anchor = self
            .registry
            .get(broadcast.epoch, broadcast.from_operator)
            .await?
            .ok_or(IngestError::AnchorUnavailable(broadcast.from_operator, broadcast.epoch))?;

        let verified = {
            let mut session = handle.state.write().await;
            session.verify_broadcast(&broadcast, &anchor.commitment_hash, &anchor.merkle_root)
        };
        if !verified {
            return Err(IngestError::BroadcastInvalid);
        }
        Ok(())
    }

    /// Runs one full session from Phase 1 through Phase 6, driven entirely by this node's
    /// own role. Returns once the session either finalizes or aborts (§7).
    pub async fn run_session(&self, session_timestamp: i64) -> Result<(), ProtocolError> {
        let full_operators = self.directory.current_operators();
        let network_has_prior =
            network_has_prior_epoch(self.peer_probe.as_ref(), full_operators.operators(), self.local_address).await;
        let local_has_active = self.keystore.get_active().is_some();
        let role = decide_role(network_has_prior, local_has_active);
        let is_dealer = matches!(
            role,
            kms_core::scheduler::SessionRole::GenesisDealer | kms_core::scheduler::SessionRole::ReshareDealer
        );

        let dealer_set = if network_has_prior {
            self.resolve_active_dealer_set(&full_operators).await
        } else {
            full_operators.clone()
        };
        let kind = if network_has_prior { SessionKind::Reshare } else { SessionKind::Dkg };

        let session = ProtocolSession::new(session_timestamp, kind, dealer_set.clone(), self.local_node_id);
        let handle = self.sessions.create(session, &self.cancellation)?;
        self.persistence.save_protocol_session(&handle.state.read().await.clone()).await?;

        let outcome = tokio::select! {
            result = self.run_phases(&handle, is_dealer, &dealer_set, &full_operators) => result,
            _ = tokio::time::sleep(self.protocol_timeout) => Err(ProtocolError::Timeout("session deadline")),
            _ = self.cancellation.cancelled() => Err(ProtocolError::Timeout("cancelled")),
        };

        self.persistence.delete_protocol_session(session_timestamp).await.ok();
        self.sessions.delete(session_timestamp);
        outcome
    }

    async fn resolve_active_dealer_set(&self, full: &OperatorSet) -> OperatorSet {
        let mut dealers = Vec::new();
        for op in full.operators() {
            if op.address == self.local_address {
                if self.keystore.get_active().is_some() {
                    dealers.push(op.clone());
                }
                continue;
            }
            if let Some(info) = self.peer_probe.probe_active_version(op).await {
                if info.is_active {
                    dealers.push(op.clone());
                }
            }
        }
        OperatorSet::new(dealers).expect("a subset of a valid operator set is itself valid")
    }

    async fn run_phases(
        &self,
        handle: &Arc<SessionHandle>,
        is_dealer: bool,
        dealer_set: &OperatorSet,
        full_operators: &OperatorSet,
    ) -> Result<(), ProtocolError> {
        let session_timestamp = handle.state.read().await.session_timestamp;
        let kind = handle.state.read().await.kind;

        // Phase 1: Commit & Share.
        let my_dealing = if is_dealer {
            let dealing = match kind {
                SessionKind::Dkg => Dealing::genesis(dealer_set.threshold(), &mut thread_rng()),
                SessionKind::Reshare => {
                    let current_share = self.keystore.active_private_share().expect(
                        "a dealer in a reshare session always holds an active share by construction",
                    );
                    Dealing::reshare(dealer_set.threshold(), current_share, &mut thread_rng())
                }
            };
            Some(dealing)
        } else {
            None
        };

        if let Some(dealing) = &my_dealing {
            let commitments = dealing.commitments();
            {
                let mut session = handle.state.write().await;
                session.record_commitments(self.local_node_id, commitments.clone());
                session.record_share(self.local_node_id, dealing.share_for(self.local_node_id));
            }

            for peer in full_operators.operators() {
                if peer.address == self.local_address {
                    continue;
                }
                let share_message = build_share_message(
                    dealing,
                    self.local_address,
                    peer.address,
                    session_timestamp,
                    session_timestamp,
                    peer.node_id(),
                );
                let envelope = AuthenticatedEnvelope::new(share_message, |h| self.signer.sign(h));
                if let Err(err) = self.transport.send_share(peer, envelope).await {
                    tracing::warn!(peer = ?peer.address, error = %err, "share delivery failed");
                }

                let commitment_message = CommitmentMessage {
                    from_operator_address: self.local_address,
                    to_operator_address: peer.address,
                    session_timestamp,
                    epoch: session_timestamp,
                    commitments: commitments.clone(),
                };
                let envelope = AuthenticatedEnvelope::new(commitment_message, |h| self.signer.sign(h));
                if let Err(err) = self.transport.send_commitment(peer, envelope).await {
                    tracing::warn!(peer = ?peer.address, error = %err, "commitment delivery failed");
                }
            }
        }

        let shares_complete = handle.completion.shares_complete.wait_timeout(self.protocol_timeout);
        let commitments_complete = handle.completion.commitments_complete.wait_timeout(self.protocol_timeout);
        let _ = tokio::join!(shares_complete, commitments_complete);

        // Phase 2: Verify & Acknowledge.
        let dealer_ids = dealer_set.node_ids();
        for &dealer_id in &dealer_ids {
            let verified = {
                let mut session = handle.state.write().await;
                session.verify_dealer(dealer_id, &format!("{:?}", self.local_address))
            };
            if !verified {
                continue;
            }

            let (share_hash, commitment_hash) = {
                let session = handle.state.read().await;
                let share = session.shares.get(&dealer_id).cloned();
                let commitments = session.commitments.get(&dealer_id).cloned();
                match (share, commitments) {
                    (Some(s), Some(c)) => (kms_core::hash::hash_share(&s), hash_commitment(&c)),
                    _ => continue,
                }
            };

            let payload = kms_core::session::Acknowledgement::signing_payload(dealer_id, &commitment_hash);
            let ack_signature = {
                let hash = ethers::utils::keccak256(&payload);
                self.signer.sign(&hash)
            };
            let ack = kms_core::session::Acknowledgement {
                player_id: self.local_node_id,
                dealer_id,
                epoch: session_timestamp,
                share_hash,
                commitment_hash,
                signature: ack_signature,
            };

            if dealer_id == self.local_node_id {
                let mut session = handle.state.write().await;
                session.record_ack(ack);
                continue;
            }

            if let Some(dealer_operator) = full_operators.operators().iter().find(|o| o.node_id() == dealer_id) {
                let ack_message = AckMessage {
                    from_operator_address: self.local_address,
                    to_operator_address: dealer_operator.address,
                    session_timestamp,
                    ack,
                };
                let envelope = AuthenticatedEnvelope::new(ack_message, |h| self.signer.sign(h));
                if let Err(err) = self.transport.send_ack(dealer_operator, envelope).await {
                    tracing::warn!(peer = ?dealer_operator.address, error = %err, "ack delivery failed");
                }
            }
        }

        {
            let mut session = handle.state.write().await;
            session.phase = Phase::Anchor;
        }

        // Phase 3: Anchor. Only dealers anchor; non-dealing joiners skip straight to
        // waiting for broadcasts.
        if let Some(dealing) = &my_dealing {
            let _ = handle.completion.acks_complete.wait_timeout(self.protocol_timeout).await;

            let merkle_tree = {
                let mut session = handle.state.write().await;
                session.build_my_merkle_tree(&dealing.commitments())
            };
            let commitment_hash = hash_commitment(&dealing.commitments());
            let anchor = Anchor { commitment_hash, merkle_root: merkle_tree.root() };
            submit_with_retry(self.registry.as_ref(), session_timestamp, anchor, &self.cancellation)
                .await
                .map_err(ProtocolError::AnchorFailure)?;

            {
                let mut session = handle.state.write().await;
                session.contract_submitted = true;
                session.phase = Phase::VerifiedBroadcast;
            }

            // Phase 4: Verified Broadcast — send every player its own inclusion proof.
            let my_acks: Vec<_> = {
                let session = handle.state.read().await;
                session
                    .acks
                    .iter()
                    .filter(|((d, _), _)| *d == self.local_node_id)
                    .map(|(_, a)| a.clone())
                    .collect()
            };

            for ack in &my_acks {
                if ack.player_id == self.local_node_id {
                    continue;
                }
                let Some(proof) = merkle_tree.proof_for(ack.player_id) else { continue };
                let broadcast = CommitmentBroadcast {
                    from_operator: self.local_node_id,
                    epoch: session_timestamp,
                    commitments: dealing.commitments(),
                    acks: my_acks.clone(),
                    merkle_proof: proof,
                };
                if let Some(player) = full_operators.operators().iter().find(|o| o.node_id() == ack.player_id) {
                    let broadcast_message = BroadcastMessage {
                        from_operator_address: self.local_address,
                        to_operator_address: player.address,
                        session_timestamp,
                        broadcast,
                    };
                    let envelope = AuthenticatedEnvelope::new(broadcast_message, |h| self.signer.sign(h));
                    if let Err(err) = self.transport.send_broadcast(player, envelope).await {
                        tracing::warn!(peer = ?player.address, error = %err, "broadcast delivery failed");
                    }
                }
            }
        } else {
            let mut session = handle.state.write().await;
            session.phase = Phase::VerifiedBroadcast;
        }

        {
            let mut session = handle.state.write().await;
            session.phase = Phase::AwaitVerifications;
        }

        // Phase 5: Await Verifications — best-effort, never aborts the session on timeout.
        let deadline = tokio::time::Instant::now() + self.protocol_timeout;
        loop {
            let verified_count = handle.state.read().await.verified_operators.len();
            if verified_count + 1 >= dealer_ids.len() || tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(BROADCAST_POLL_INTERVAL) => {}
                _ = self.cancellation.cancelled() => break,
            }
        }

        // Phase 6: Finalize.
        {
            let mut session = handle.state.write().await;
            session.phase = Phase::Finalize;
        }
        let (private_share, commitments, participant_ids) = {
            let session = handle.state.read().await;
            let (share, commitments) = match session.kind {
                SessionKind::Dkg => session.finalize_dkg()?,
                SessionKind::Reshare => session.finalize_reshare()?,
            };
            (share, commitments, session.valid_dealer_set())
        };

        let version = KeyShareVersion {
            epoch: session_timestamp,
            private_share,
            commitments,
            participant_ids: participant_ids.into_iter().map(|id| id as i64).collect(),
            is_active: true,
        };

        self.persistence.save_key_share_version(&version).await?;
        self.persistence.set_active_version_epoch(session_timestamp).await?;
        self.keystore.add(version);
        self.keystore.set_active(session_timestamp);

        Ok(())
    }
}
