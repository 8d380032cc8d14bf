//! Multi-operator end-to-end scenarios (spec §8's S1/S2/S5), driven the way
//! `dkg-core::node::tests::dkg_sign_e2e` drives several in-process participants over shared
//! in-memory boards: every node here is a real [`Orchestrator`] talking to its peers through
//! an in-process [`Transport`] that dispatches straight into the target's `ingest_*` methods,
//! anchoring to a single shared [`InMemoryCommitmentRegistry`] instead of a chain.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use tokio_util::sync::CancellationToken;

use kms_core::client::recover_app_sk;
use kms_core::client::partial_sign;
use kms_core::keystore::KeyStore;
use kms_core::operator::{threshold_for, Operator, OperatorSet, SigningKey};
use kms_core::registry::{Anchor, AnchorError, CommitmentRegistry, InMemoryCommitmentRegistry};
use kms_core::session::SessionMap;
use kms_core::transport::{
    AckMessage, AuthenticatedEnvelope, BroadcastMessage, CommitmentMessage, ShareMessage, Transport, TransportError,
};
use kms_node::auth::OperatorSignatureVerifier;
use kms_node::http::PubkeyResponse;
use kms_node::orchestrator::Orchestrator;
use kms_node::peering::{ConfiguredOperatorDirectory, OperatorDirectory, PeerProbe};
use kms_node::persistence::{InMemoryPersistence, Persistence};
use kms_node::signer::LocalSigner;

/// Dispatches each send straight into the addressed peer's `ingest_*`, standing in for the
/// HTTP hop a real deployment makes.
struct NetworkTransport {
    nodes: Arc<DashMap<Address, Arc<Orchestrator>>>,
}

impl NetworkTransport {
    fn target(&self, address: Address) -> Result<Arc<Orchestrator>, TransportError> {
        self.nodes
            .get(&address)
            .map(|e| e.value().clone())
            .ok_or_else(|| TransportError::Request(address, "no such peer in test network".into()))
    }
}

#[async_trait]
impl Transport for NetworkTransport {
    async fn send_commitment(&self, to: &Operator, envelope: AuthenticatedEnvelope<CommitmentMessage>) -> Result<(), TransportError> {
        self.target(to.address)?
            .ingest_commitment(envelope)
            .await
            .map_err(|e| TransportError::Request(to.address, e.to_string()))
    }

    async fn send_share(&self, to: &Operator, envelope: AuthenticatedEnvelope<ShareMessage>) -> Result<(), TransportError> {
        self.target(to.address)?
            .ingest_share(envelope)
            .await
            .map_err(|e| TransportError::Request(to.address, e.to_string()))
    }

    async fn send_ack(&self, to: &Operator, envelope: AuthenticatedEnvelope<AckMessage>) -> Result<(), TransportError> {
        self.target(to.address)?
            .ingest_ack(envelope)
            .await
            .map_err(|e| TransportError::Request(to.address, e.to_string()))
    }

    async fn send_broadcast(&self, to: &Operator, envelope: AuthenticatedEnvelope<BroadcastMessage>) -> Result<(), TransportError> {
        self.target(to.address)?
            .ingest_broadcast(envelope)
            .await
            .map_err(|e| TransportError::Request(to.address, e.to_string()))
    }
}

/// Reads a peer's "do you have an active version" status straight from its keystore, standing
/// in for the `GET /pubkey` probe a real deployment makes.
struct NetworkPeerProbe {
    nodes: Arc<DashMap<Address, Arc<Orchestrator>>>,
}

#[async_trait]
impl PeerProbe for NetworkPeerProbe {
    async fn probe_active_version(&self, peer: &Operator) -> Option<PubkeyResponse> {
        let node = self.nodes.get(&peer.address)?.value().clone();
        match node.keystore.get_active() {
            Some(version) => Some(PubkeyResponse {
                operator_address: peer.address,
                commitments: version.commitments,
                version: version.epoch,
                is_active: true,
            }),
            None => Some(PubkeyResponse { operator_address: peer.address, commitments: vec![], version: 0, is_active: false }),
        }
    }
}

struct TestNode {
    operator: Operator,
    wallet: LocalWallet,
    orchestrator: Arc<Orchestrator>,
}

/// Builds one in-process node and registers it in the shared transport/probe directory.
fn spawn_node(
    operators: OperatorSet,
    keystore: Arc<KeyStore>,
    persistence: Arc<dyn Persistence>,
    registry: &Arc<InMemoryCommitmentRegistry>,
    nodes: &Arc<DashMap<Address, Arc<Orchestrator>>>,
    wallet: LocalWallet,
) -> TestNode {
    let address = wallet.address();
    let node_id = kms_core::operator::node_id(address);
    let operator = operators.get(node_id).cloned().expect("wallet must be one of the configured operators");

    let orchestrator = Arc::new(Orchestrator {
        local_address: address,
        local_node_id: node_id,
        sessions: SessionMap::new(),
        keystore,
        persistence,
        registry: Arc::new(registry.for_operator(node_id)),
        transport: Arc::new(NetworkTransport { nodes: nodes.clone() }),
        verifier: Arc::new(OperatorSignatureVerifier),
        signer: Arc::new(LocalSigner::Ecdsa(wallet.clone())),
        directory: Arc::new(ConfiguredOperatorDirectory::new(operators)),
        peer_probe: Arc::new(NetworkPeerProbe { nodes: nodes.clone() }),
        cancellation: CancellationToken::new(),
        protocol_timeout: Duration::from_secs(10),
        session_wait_timeout: Duration::from_secs(2),
    });

    nodes.insert(address, orchestrator.clone());
    TestNode { operator, wallet, orchestrator }
}

/// Runs every node's `run_session(session_timestamp)` concurrently and waits for all of them,
/// since the six-phase protocol only progresses when every participant's messages interleave.
async fn run_all(nodes: &[TestNode], session_timestamp: i64) -> Vec<Result<(), kms_core::error::ProtocolError>> {
    let handles: Vec<_> = nodes
        .iter()
        .map(|node| {
            let orchestrator = node.orchestrator.clone();
            tokio::spawn(async move { orchestrator.run_session(session_timestamp).await })
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await.expect("session task panicked"));
    }
    results
}

fn operator_for(wallet: &LocalWallet) -> Operator {
    Operator {
        address: wallet.address(),
        socket: "127.0.0.1:0".parse().unwrap(),
        signing_key: SigningKey::Ecdsa(wallet.address()),
    }
}

/// S1 — genesis DKG, n=3, t=2. Every partial recovered from any 2-of-3 subset of operators
/// must land on the same application key (spec §8 invariant 1).
#[tokio::test]
async fn genesis_dkg_three_of_three_recovers_consistent_app_key() {
    let wallets: Vec<LocalWallet> = (0..3).map(|_| LocalWallet::new(&mut rand::thread_rng())).collect();
    let operators = OperatorSet::new(wallets.iter().map(operator_for).collect()).unwrap();
    assert_eq!(operators.threshold(), threshold_for(3));

    let registry = InMemoryCommitmentRegistry::new();
    let nodes: Arc<DashMap<Address, Arc<Orchestrator>>> = Arc::new(DashMap::new());

    let test_nodes: Vec<TestNode> = wallets
        .into_iter()
        .map(|wallet| {
            spawn_node(
                operators.clone(),
                Arc::new(KeyStore::new()),
                Arc::new(InMemoryPersistence::default()),
                &registry,
                &nodes,
                wallet,
            )
        })
        .collect();

    let results = run_all(&test_nodes, 1_000).await;
    for result in &results {
        assert!(result.is_ok(), "genesis session failed: {result:?}");
    }

    let mut partials = Vec::new();
    for node in &test_nodes {
        let version = node.orchestrator.keystore.get_active().expect("every operator finalizes a version");
        assert_eq!(version.epoch, 1_000);
        let partial = partial_sign(&version.private_share, b"my-app").unwrap();
        partials.push((node.operator.node_id(), partial));
    }

    let threshold = operators.threshold();
    let app_sk_01 = recover_app_sk(threshold, &partials[0..2]).unwrap();
    let app_sk_12 = recover_app_sk(threshold, &partials[1..3]).unwrap();
    let app_sk_02 = recover_app_sk(threshold, &[partials[0].clone(), partials[2].clone()]).unwrap();
    assert_eq!(app_sk_01, app_sk_12);
    assert_eq!(app_sk_01, app_sk_02);
}

/// S2 — reshare n=3→5, t 2→4, starting from S1's end-state. The application key recovered
/// after the reshare must equal the one recovered before it (spec §8 invariant 2).
#[tokio::test]
async fn reshare_from_three_to_five_preserves_application_key() {
    let original_wallets: Vec<LocalWallet> = (0..3).map(|_| LocalWallet::new(&mut rand::thread_rng())).collect();
    let genesis_operators = OperatorSet::new(original_wallets.iter().map(operator_for).collect()).unwrap();

    let registry = InMemoryCommitmentRegistry::new();
    let nodes: Arc<DashMap<Address, Arc<Orchestrator>>> = Arc::new(DashMap::new());

    let keystores: Vec<Arc<KeyStore>> = (0..3).map(|_| Arc::new(KeyStore::new())).collect();
    let genesis_nodes: Vec<TestNode> = original_wallets
        .iter()
        .cloned()
        .zip(keystores.iter().cloned())
        .map(|(wallet, keystore)| {
            spawn_node(genesis_operators.clone(), keystore, Arc::new(InMemoryPersistence::default()), &registry, &nodes, wallet)
        })
        .collect();

    let results = run_all(&genesis_nodes, 1_000).await;
    for result in &results {
        assert!(result.is_ok(), "genesis session failed: {result:?}");
    }

    let pre_reshare_partials: Vec<(u64, Vec<u8>)> = genesis_nodes
        .iter()
        .map(|node| {
            let version = node.orchestrator.keystore.get_active().unwrap();
            (node.operator.node_id(), partial_sign(&version.private_share, b"my-app").unwrap())
        })
        .collect();
    let app_sk_before = recover_app_sk(genesis_operators.threshold(), &pre_reshare_partials[0..2]).unwrap();

    let joiner_wallets: Vec<LocalWallet> = (0..2).map(|_| LocalWallet::new(&mut rand::thread_rng())).collect();
    let all_wallets: Vec<LocalWallet> = original_wallets.iter().cloned().chain(joiner_wallets.iter().cloned()).collect();
    let reshared_operators = OperatorSet::new(all_wallets.iter().map(operator_for).collect()).unwrap();
    assert_eq!(reshared_operators.threshold(), threshold_for(5));

    // Existing operators keep their keystore/persistence across the reshare; new joiners start
    // fresh. All five get a rebuilt `Orchestrator` bound to the five-operator directory.
    let mut reshared_nodes = Vec::new();
    for (wallet, keystore) in original_wallets.into_iter().zip(keystores.into_iter()) {
        reshared_nodes.push(spawn_node(
            reshared_operators.clone(),
            keystore,
            Arc::new(InMemoryPersistence::default()),
            &registry,
            &nodes,
            wallet,
        ));
    }
    for wallet in joiner_wallets {
        reshared_nodes.push(spawn_node(
            reshared_operators.clone(),
            Arc::new(KeyStore::new()),
            Arc::new(InMemoryPersistence::default()),
            &registry,
            &nodes,
            wallet,
        ));
    }

    let results = run_all(&reshared_nodes, 2_000).await;
    for result in &results {
        assert!(result.is_ok(), "reshare session failed: {result:?}");
    }

    let post_reshare_partials: Vec<(u64, Vec<u8>)> = reshared_nodes
        .iter()
        .map(|node| {
            let version = node.orchestrator.keystore.get_active().expect("every operator (dealer or joiner) finalizes a version");
            assert_eq!(version.epoch, 2_000);
            (node.operator.node_id(), partial_sign(&version.private_share, b"my-app").unwrap())
        })
        .collect();

    let new_threshold = reshared_operators.threshold();
    let app_sk_after_a = recover_app_sk(new_threshold, &post_reshare_partials[0..4]).unwrap();
    let app_sk_after_b = recover_app_sk(new_threshold, &post_reshare_partials[1..5]).unwrap();
    assert_eq!(app_sk_after_a, app_sk_after_b, "different size-4 subsets of the reshared set must agree");
    assert_eq!(app_sk_before, app_sk_after_a, "reshare must preserve the application key (master secret)");
}

/// A `CommitmentRegistry` that always fails `submit`, for S5's cancellation-during-anchor-retry
/// scenario: the dealer never gets past Phase 3 on its own.
struct AlwaysFailingRegistry;

#[async_trait]
impl CommitmentRegistry for AlwaysFailingRegistry {
    async fn submit(&self, _epoch: i64, _anchor: Anchor) -> Result<(), AnchorError> {
        Err(AnchorError::Registry("registry unreachable".into()))
    }

    async fn get(&self, _epoch: i64, _operator_node_id: u64) -> Result<Option<Anchor>, AnchorError> {
        Ok(None)
    }
}

struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
    async fn send_commitment(&self, _to: &Operator, _envelope: AuthenticatedEnvelope<CommitmentMessage>) -> Result<(), TransportError> {
        Ok(())
    }
    async fn send_share(&self, _to: &Operator, _envelope: AuthenticatedEnvelope<ShareMessage>) -> Result<(), TransportError> {
        Ok(())
    }
    async fn send_ack(&self, _to: &Operator, _envelope: AuthenticatedEnvelope<AckMessage>) -> Result<(), TransportError> {
        Ok(())
    }
    async fn send_broadcast(&self, _to: &Operator, _envelope: AuthenticatedEnvelope<BroadcastMessage>) -> Result<(), TransportError> {
        Ok(())
    }
}

struct NeverActivePeerProbe;

#[async_trait]
impl PeerProbe for NeverActivePeerProbe {
    async fn probe_active_version(&self, _peer: &Operator) -> Option<PubkeyResponse> {
        None
    }
}

/// S5 — shutdown mid-Phase-3: cancelling during the anchor retry loop aborts the session
/// promptly (no 2s/4s backoff is ever waited out in full), the in-flight session is removed
/// from persistence, and the keystore is left untouched.
#[tokio::test]
async fn cancellation_during_anchor_retry_aborts_promptly() {
    let wallet = LocalWallet::new(&mut rand::thread_rng());
    let operators = OperatorSet::new(vec![operator_for(&wallet)]).unwrap();
    assert_eq!(operators.threshold(), threshold_for(1));

    let keystore = Arc::new(KeyStore::new());
    let persistence: Arc<dyn Persistence> = Arc::new(InMemoryPersistence::default());
    let cancellation = CancellationToken::new();

    let orchestrator = Arc::new(Orchestrator {
        local_address: wallet.address(),
        local_node_id: kms_core::operator::node_id(wallet.address()),
        sessions: SessionMap::new(),
        keystore: keystore.clone(),
        persistence: persistence.clone(),
        registry: Arc::new(AlwaysFailingRegistry),
        transport: Arc::new(NullTransport),
        verifier: Arc::new(OperatorSignatureVerifier),
        signer: Arc::new(LocalSigner::Ecdsa(wallet.clone())),
        directory: Arc::new(ConfiguredOperatorDirectory::new(operators)),
        peer_probe: Arc::new(NeverActivePeerProbe),
        cancellation: cancellation.clone(),
        protocol_timeout: Duration::from_secs(30),
        session_wait_timeout: Duration::from_secs(1),
    });

    let started = std::time::Instant::now();
    let handle = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.run_session(3_000).await }
    });

    // Give the first (doomed) submit attempt a chance to run and land in its backoff sleep,
    // then cancel: the retry's `tokio::select!` reacts to cancellation, not the 2s timer.
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancellation.cancel();

    let outcome = handle.await.unwrap();
    assert!(outcome.is_err(), "a cancelled anchor retry must not finalize the session");
    assert!(started.elapsed() < Duration::from_millis(500), "cancellation must abort promptly, not after the full backoff");

    assert!(persistence.list_protocol_sessions().await.unwrap().is_empty());
    assert!(keystore.get_active().is_none());
}
