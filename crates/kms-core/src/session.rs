//! The per-epoch protocol session: shares/commitments/acks bookkeeping, the six-phase
//! state machine, completion latches, and the concurrent session map.
//!
//! Grounded on the upstream `DKGInfo`/`ReshareInfo` split (dealer vs. player vs. new-joiner
//! roles) and `states.rs`'s verification/finalize equations, restructured around a single
//! long-lived, lock-guarded session rather than a chain of consuming phase structs: this
//! protocol's phases are driven by concurrent HTTP delivery into shared state, not a
//! single-threaded batch board.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;

use crate::dkg::share_correct;
use crate::error::ProtocolError;
use crate::hash::hash_commitment;
use crate::lagrange::lagrange_coefficient;
use crate::merkle::{AckMerkleTree, MerkleProof};
use crate::operator::OperatorSet;
use threshold_bls::curve::bls12381::{Scalar, G2};
use threshold_bls::group::Element;

/// `dkg` runs a fresh Pedersen DKG from scratch; `reshare` transforms an existing sharing,
/// possibly over a different operator set and threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionKind {
    Dkg,
    Reshare,
}

/// The six strictly-ordered phases of §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Phase {
    CommitAndShare = 1,
    VerifyAndAcknowledge = 2,
    Anchor = 3,
    VerifiedBroadcast = 4,
    AwaitVerifications = 5,
    Finalize = 6,
}

/// The protocol's binding device: a receipt, signed by the player, that a given share and
/// commitment set were received intact for a given session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub player_id: u64,
    pub dealer_id: u64,
    pub epoch: i64,
    pub share_hash: [u8; 32],
    pub commitment_hash: [u8; 32],
    pub signature: Vec<u8>,
}

impl Acknowledgement {
    /// The bytes a player signs: `dealer_id || commitment_hash`. The envelope signature
    /// covers only this, not the whole ack, per §3.
    pub fn signing_payload(dealer_id: u64, commitment_hash: &[u8; 32]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + 32);
        buf.extend_from_slice(&dealer_id.to_be_bytes());
        buf.extend_from_slice(commitment_hash);
        buf
    }
}

/// A structured complaint, logged (not returned as a hard error) when a received share
/// fails §4.2 verification. Field list matches §4.3 Phase 2 exactly so it can be emitted
/// as a `tracing` event with these names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplaintEvent {
    pub protocol: &'static str,
    pub operator_address: String,
    pub receiver_node_id: u64,
    pub session_timestamp: i64,
    pub dealer_id: u64,
    pub commitment_count: usize,
    pub share_hash: [u8; 32],
    pub commitment_hash: [u8; 32],
}

fn emit_complaint(e: &ComplaintEvent) {
    tracing::warn!(
        protocol = e.protocol,
        operator_address = %e.operator_address,
        receiver_node_id = e.receiver_node_id,
        session_timestamp = e.session_timestamp,
        dealer_id = e.dealer_id,
        commitment_count = e.commitment_count,
        share_hash = %hex_of(&e.share_hash),
        commitment_hash = %hex_of(&e.commitment_hash),
        "complaint"
    );
}

fn hex_of(b: &[u8; 32]) -> String {
    b.iter().map(|x| format!("{:02x}", x)).collect()
}

/// A broadcast from a dealer to every peer in Phase 4, carrying the recipient's own
/// inclusion proof into the dealer's anchored ack tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitmentBroadcast {
    pub from_operator: u64,
    pub epoch: i64,
    pub commitments: Vec<G2>,
    pub acks: Vec<Acknowledgement>,
    pub merkle_proof: MerkleProof,
}

/// Transient per-epoch protocol state, owned exclusively by the orchestrator and mutated
/// under [`SessionHandle`]'s lock. This struct alone is what gets persisted at phase
/// transitions (§4.3): it carries no lock or notify handles itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolSession {
    pub session_timestamp: i64,
    pub kind: SessionKind,
    pub phase: Phase,
    pub operators: OperatorSet,
    /// This node's own node-id within `operators`.
    pub local_node_id: u64,
    /// Shares received, keyed by dealer node-id.
    pub shares: HashMap<u64, Scalar>,
    /// Commitments received, keyed by dealer node-id.
    pub commitments: HashMap<u64, Vec<G2>>,
    /// Acks received as a dealer, keyed by `(dealer_id, player_id)`.
    pub acks: HashMap<(u64, u64), Acknowledgement>,
    /// Dealers whose Phase-4 broadcast we have verified.
    pub verified_operators: HashSet<u64>,
    /// keccak256 of this node's own concatenated commitment encodings.
    pub my_commitment_hash: Option<[u8; 32]>,
    pub contract_submitted: bool,
    pub complaints: Vec<(u64, crate::error::CryptoError)>,
}

impl ProtocolSession {
    pub fn new(
        session_timestamp: i64,
        kind: SessionKind,
        operators: OperatorSet,
        local_node_id: u64,
    ) -> Self {
        Self {
            session_timestamp,
            kind,
            phase: Phase::CommitAndShare,
            operators,
            local_node_id,
            shares: HashMap::new(),
            commitments: HashMap::new(),
            acks: HashMap::new(),
            verified_operators: HashSet::new(),
            my_commitment_hash: None,
            contract_submitted: false,
            complaints: Vec::new(),
        }
    }

    pub fn n(&self) -> usize {
        self.operators.len()
    }

    pub fn threshold(&self) -> usize {
        self.operators.threshold()
    }

    /// Records a share received from `dealer_id`. First-write-wins: a duplicate delivery
    /// is ignored, matching the spec's duplicate-suppression ordering rule.
    pub fn record_share(&mut self, dealer_id: u64, share: Scalar) {
        self.shares.entry(dealer_id).or_insert(share);
    }

    /// Records a dealer's public commitment list.
    pub fn record_commitments(&mut self, dealer_id: u64, commitments: Vec<G2>) {
        self.commitments.entry(dealer_id).or_insert(commitments);
    }

    pub fn shares_complete(&self) -> bool {
        self.shares.len() == self.n()
    }

    pub fn commitments_complete(&self) -> bool {
        self.commitments.len() == self.n()
    }

    /// Phase 2: verifies the share received from `dealer_id` against its commitments.
    /// On success records nothing further here (the caller sends the ack); on failure
    /// emits a structured complaint and returns `false` — the session still proceeds if
    /// the surviving set reaches threshold.
    pub fn verify_dealer(&mut self, dealer_id: u64, operator_address: &str) -> bool {
        let share = match self.shares.get(&dealer_id) {
            Some(s) => s.clone(),
            None => return false,
        };
        let commitments = match self.commitments.get(&dealer_id) {
            Some(c) => c.clone(),
            None => return false,
        };

        if share_correct(self.local_node_id, &share, &commitments) {
            true
        } else {
            let share_hash = crate::hash::hash_share(&share);
            let commitment_hash = hash_commitment(&commitments);
            let event = ComplaintEvent {
                protocol: if self.kind == SessionKind::Dkg { "dkg" } else { "reshare" },
                operator_address: operator_address.to_string(),
                receiver_node_id: self.local_node_id,
                session_timestamp: self.session_timestamp,
                dealer_id,
                commitment_count: commitments.len(),
                share_hash,
                commitment_hash,
            };
            emit_complaint(&event);
            self.complaints
                .push((dealer_id, crate::error::CryptoError::InvalidShare(dealer_id)));
            false
        }
    }

    /// Records an ack addressed to this node as dealer. Duplicate `(dealer_id, player_id)`
    /// pairs are rejected — the first one is retained (invariant 5).
    pub fn record_ack(&mut self, ack: Acknowledgement) -> bool {
        let key = (ack.dealer_id, ack.player_id);
        if self.acks.contains_key(&key) {
            return false;
        }
        self.acks.insert(key, ack);
        true
    }

    pub fn acks_for_me_count(&self) -> usize {
        self.acks
            .keys()
            .filter(|(dealer_id, _)| *dealer_id == self.local_node_id)
            .count()
    }

    /// Builds the merkle tree over acks this node collected as dealer, computing
    /// `my_commitment_hash` along the way.
    pub fn build_my_merkle_tree(&mut self, my_commitments: &[G2]) -> AckMerkleTree {
        let my_acks: Vec<Acknowledgement> = self
            .acks
            .iter()
            .filter(|((dealer_id, _), _)| *dealer_id == self.local_node_id)
            .map(|(_, ack)| ack.clone())
            .collect();

        self.my_commitment_hash = Some(hash_commitment(my_commitments));
        AckMerkleTree::build(my_acks)
    }

    /// Phase 4 recipient-side verification: the broadcast must contain the recipient's own
    /// ack, whose `share_hash` matches the share actually received from `from_operator`,
    /// the commitment hash must match what was anchored on-chain, and the merkle proof
    /// must be valid under the anchored root.
    pub fn verify_broadcast(
        &mut self,
        broadcast: &CommitmentBroadcast,
        anchored_commitment_hash: &[u8; 32],
        anchored_root: &[u8; 32],
    ) -> bool {
        let my_ack = match broadcast
            .acks
            .iter()
            .find(|a| a.player_id == self.local_node_id && a.dealer_id == broadcast.from_operator)
        {
            Some(a) => a,
            None => return false,
        };

        let received_share = match self.shares.get(&broadcast.from_operator) {
            Some(s) => s,
            None => return false,
        };
        if &crate::hash::hash_share(received_share) != &my_ack.share_hash {
            return false;
        }

        if &hash_commitment(&broadcast.commitments) != anchored_commitment_hash {
            return false;
        }

        if !broadcast.merkle_proof.verify(anchored_root) {
            return false;
        }

        self.verified_operators.insert(broadcast.from_operator);
        true
    }

    /// Dealer ids whose shares verified in Phase 2 and whose commitments are present —
    /// the set `V` that Phase 6 finalize combines over.
    pub fn valid_dealer_set(&self) -> Vec<u64> {
        let complained: HashSet<u64> = self.complaints.iter().map(|(d, _)| *d).collect();
        self.shares
            .keys()
            .filter(|d| !complained.contains(d) && self.commitments.contains_key(d))
            .copied()
            .collect()
    }

    /// DKG finalize: new private share is the plain sum of shares from `V`; commitments
    /// are stored unscaled.
    pub fn finalize_dkg(&self) -> Result<(Scalar, Vec<G2>), ProtocolError> {
        let v = self.valid_dealer_set();
        if v.len() < self.threshold() {
            return Err(ProtocolError::NotEnoughValidShares(v.len(), self.threshold()));
        }

        let mut share = Scalar::new();
        for dealer in &v {
            share.add(&self.shares[dealer]);
        }

        let my_commitments = self.commitments.get(&self.local_node_id).cloned().unwrap_or_default();
        Ok((share, my_commitments))
    }

    /// Reshare finalize: new private share is the Lagrange combination of shares from
    /// `V`; `commitments_out[0]` is scaled by `lambda_self(0, V)`, higher-degree
    /// commitments are stored unscaled (per §4.3 and the Open Question resolved in
    /// DESIGN.md).
    pub fn finalize_reshare(&self) -> Result<(Scalar, Vec<G2>), ProtocolError> {
        let v = self.valid_dealer_set();
        if v.len() < self.threshold() {
            return Err(ProtocolError::NotEnoughValidShares(v.len(), self.threshold()));
        }

        let mut share = Scalar::new();
        for dealer in &v {
            let lambda: Scalar = lagrange_coefficient(*dealer, &v);
            let mut term = self.shares[dealer].clone();
            term.mul(&lambda);
            share.add(&term);
        }

        let mut my_commitments = self.commitments.get(&self.local_node_id).cloned().unwrap_or_default();
        if !my_commitments.is_empty() {
            let lambda_self: Scalar = lagrange_coefficient(self.local_node_id, &v);
            my_commitments[0].mul(&lambda_self);
        }

        Ok((share, my_commitments))
    }
}

/// A one-shot latch: `fire()` wakes all current and future waiters exactly once.
/// `tokio::sync::Notify` alone only wakes waiters registered *before* the call, so this
/// pairs it with a flag checked before and after subscribing, the standard pattern for a
/// "fires once, replays to late arrivals" completion signal.
pub struct Latch {
    fired: AtomicBool,
    notify: Notify,
}

impl Default for Latch {
    fn default() -> Self {
        Self {
            fired: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        self.fired.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        if self.is_fired() {
            return;
        }
        let notified = self.notify.notified();
        tokio::pin!(notified);
        if self.is_fired() {
            return;
        }
        notified.await;
    }

    pub async fn wait_timeout(&self, timeout: Duration) -> Result<(), tokio::time::error::Elapsed> {
        tokio::time::timeout(timeout, self.wait()).await
    }
}

/// The three one-shot completion signals a session owns: they fire exactly once, when
/// the dealer-count for shares/commitments/acks is reached.
#[derive(Default)]
pub struct CompletionChannels {
    pub shares_complete: Latch,
    pub commitments_complete: Latch,
    pub acks_complete: Latch,
}

/// A session plus the runtime handles around it: its own reader-writer lock (hold time is
/// bounded — no I/O while held), its completion latches, and a per-session cancellation
/// token derived from the node-wide one.
pub struct SessionHandle {
    pub state: RwLock<ProtocolSession>,
    pub completion: CompletionChannels,
    pub cancellation: CancellationToken,
}

impl SessionHandle {
    pub fn new(session: ProtocolSession, parent_cancellation: &CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(session),
            completion: CompletionChannels::default(),
            cancellation: parent_cancellation.child_token(),
        })
    }
}

/// The concurrent `timestamp -> session` map, plus the "wait for entry" latches HTTP
/// handlers use when a message for a not-yet-created session arrives. Only `create` and
/// `delete` touch the map itself; all other access goes through the returned handle's own
/// lock, so the map's internal sharding is never a contention point for session work.
#[derive(Default)]
pub struct SessionMap {
    sessions: DashMap<i64, Arc<SessionHandle>>,
    creation_latches: DashMap<i64, Arc<Latch>>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &self,
        session: ProtocolSession,
        parent_cancellation: &CancellationToken,
    ) -> Result<Arc<SessionHandle>, ProtocolError> {
        let timestamp = session.session_timestamp;
        if self.sessions.contains_key(&timestamp) {
            return Err(ProtocolError::DuplicateSession(timestamp));
        }
        let handle = SessionHandle::new(session, parent_cancellation);
        self.sessions.insert(timestamp, handle.clone());
        if let Some((_, latch)) = self.creation_latches.remove(&timestamp) {
            latch.fire();
        }
        Ok(handle)
    }

    pub fn get(&self, timestamp: i64) -> Option<Arc<SessionHandle>> {
        self.sessions.get(&timestamp).map(|e| e.value().clone())
    }

    pub fn delete(&self, timestamp: i64) -> Option<Arc<SessionHandle>> {
        self.sessions.remove(&timestamp).map(|(_, v)| v)
    }

    /// Waits up to `timeout` for a session with `timestamp` to be created, for handlers
    /// that race an in-flight orchestrator. Returns the handle, or `None` on timeout.
    pub async fn wait_for_entry(&self, timestamp: i64, timeout: Duration) -> Option<Arc<SessionHandle>> {
        if let Some(existing) = self.get(timestamp) {
            return Some(existing);
        }

        let latch = self
            .creation_latches
            .entry(timestamp)
            .or_insert_with(|| Arc::new(Latch::new()))
            .clone();

        if let Some(existing) = self.get(timestamp) {
            return Some(existing);
        }

        let _ = latch.wait_timeout(timeout).await;
        self.get(timestamp)
    }
}

/// Recovers the free (constant) coefficient from a public polynomial's commitments — used
/// to sanity-check a DKG/reshare result's master public key against `Poly::commit`'s
/// layout in tests.
pub fn master_public_key(contributions: &[G2]) -> G2 {
    let mut acc = G2::new();
    for c in contributions {
        acc.add(c);
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dkg::Dealing;
    use crate::operator::{threshold_for, Operator, OperatorSet, SigningKey};
    use ethers::types::Address;
    use rand::thread_rng;

    fn operator_set(n: u8) -> (OperatorSet, Vec<u64>) {
        let ops: Vec<Operator> = (1..=n)
            .map(|i| Operator {
                address: Address::from_slice(&[i; 20]),
                socket: "127.0.0.1:9000".parse().unwrap(),
                signing_key: SigningKey::Ecdsa(Address::from_slice(&[i; 20])),
            })
            .collect();
        let ids = ops.iter().map(|o| o.node_id()).collect();
        (OperatorSet::new(ops).unwrap(), ids)
    }

    #[test]
    fn genesis_dkg_end_to_end() {
        let (operators, ids) = operator_set(4);
        let threshold = threshold_for(4);
        assert_eq!(threshold, 3);

        // Each operator deals a polynomial and evaluates a share for every other operator.
        let dealings: HashMap<u64, Dealing> = ids
            .iter()
            .map(|&id| (id, Dealing::genesis(threshold, &mut thread_rng())))
            .collect();

        let mut sessions: HashMap<u64, ProtocolSession> = ids
            .iter()
            .map(|&id| (id, ProtocolSession::new(1000, SessionKind::Dkg, operators.clone(), id)))
            .collect();

        for (&dealer, dealing) in &dealings {
            let commitments = dealing.commitments();
            for &player in &ids {
                let share = dealing.share_for(player);
                let session = sessions.get_mut(&player).unwrap();
                session.record_share(dealer, share);
                session.record_commitments(dealer, commitments.clone());
            }
        }

        for &id in &ids {
            let session = sessions.get_mut(&id).unwrap();
            for &dealer in &ids {
                assert!(session.verify_dealer(dealer, "0xoperator"));
            }
        }

        let mut master_contributions = Vec::new();
        for &id in &ids {
            let (_, commitments) = sessions[&id].finalize_dkg().unwrap();
            master_contributions.push(commitments[0].clone());
        }

        let master_pk = master_public_key(&master_contributions);
        assert_ne!(master_pk, G2::new());
    }

    #[test]
    fn malicious_dealer_share_is_complained_and_excluded_from_finalize() {
        let (operators, ids) = operator_set(4);
        let threshold = threshold_for(4);
        assert_eq!(threshold, 3);

        let dealings: HashMap<u64, Dealing> = ids
            .iter()
            .map(|&id| (id, Dealing::genesis(threshold, &mut thread_rng())))
            .collect();
        let liar = ids[0];

        let mut sessions: HashMap<u64, ProtocolSession> = ids
            .iter()
            .map(|&id| (id, ProtocolSession::new(1000, SessionKind::Dkg, operators.clone(), id)))
            .collect();

        for (&dealer, dealing) in &dealings {
            let commitments = dealing.commitments();
            for &player in &ids {
                let mut share = dealing.share_for(player);
                if dealer == liar && player != liar {
                    // The dealer hands every other player a share that does not match the
                    // commitments it published.
                    share.add(&Scalar::one());
                }
                let session = sessions.get_mut(&player).unwrap();
                session.record_share(dealer, share);
                session.record_commitments(dealer, commitments.clone());
            }
        }

        for &id in &ids {
            let session = sessions.get_mut(&id).unwrap();
            for &dealer in &ids {
                let ok = session.verify_dealer(dealer, "0xoperator");
                if dealer == liar && id != liar {
                    assert!(!ok);
                } else {
                    assert!(ok);
                }
            }
        }

        for &id in &ids {
            if id == liar {
                continue;
            }
            let session = &sessions[&id];
            assert_eq!(session.complaints.len(), 1);
            assert_eq!(session.complaints[0].0, liar);
            assert!(!session.valid_dealer_set().contains(&liar));
            assert!(session.valid_dealer_set().len() >= threshold);
            assert!(session.finalize_dkg().is_ok());
        }
    }

    #[test]
    fn duplicate_ack_rejected() {
        let (operators, ids) = operator_set(3);
        let mut session = ProtocolSession::new(1, SessionKind::Dkg, operators, ids[0]);
        let ack = Acknowledgement {
            player_id: ids[1],
            dealer_id: ids[0],
            epoch: 1,
            share_hash: [1u8; 32],
            commitment_hash: [2u8; 32],
            signature: vec![],
        };
        assert!(session.record_ack(ack.clone()));
        assert!(!session.record_ack(ack));
    }
}
