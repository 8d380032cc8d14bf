//! The node daemon: loads configuration, wires every boundary collaborator into an
//! [`Orchestrator`], restores keystore/scheduler state from disk, then runs the HTTP
//! server and the block-boundary scheduler side by side until shutdown.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use kms_core::keystore::KeyStore;
use kms_core::operator::node_id;
use kms_core::scheduler::Scheduler;
use kms_node::attestation::TrustedJsonAttestationVerifier;
use kms_node::auth::OperatorSignatureVerifier;
use kms_node::config::NodeConfig;
use kms_node::http::{self, AppState};
use kms_node::orchestrator::Orchestrator;
use kms_node::peering::{ConfiguredOperatorDirectory, HttpPeerProbe};
use kms_node::persistence::{NodeState, Persistence, SledPersistence};
use kms_node::registry_eth::EthCommitmentRegistry;
use kms_node::release::InMemoryReleaseRegistry;
use kms_node::signer::LocalSigner;
use kms_node::transport_http::HttpTransport;

#[derive(Parser)]
#[command(author, version, about = "Threshold key-management node")]
struct Cli {
    /// Path to the node's TOML configuration file.
    #[arg(long, default_value = "kms-node.toml")]
    config: std::path::PathBuf,
}

fn load_chain_signer_wallet(path: &str, chain_id: u64) -> anyhow::Result<LocalWallet> {
    let text = std::fs::read_to_string(path)?;
    let hex_str = text.trim().trim_start_matches("0x");
    let bytes = hex::decode(hex_str)?;
    Ok(LocalWallet::from_bytes(&bytes)?.with_chain_id(chain_id))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "kms_node=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = NodeConfig::load(&cli.config)?;
    info!(config = %cli.config.display(), "loaded node configuration");

    let local_node_id = node_id(config.operator_address);
    let local_operator = config
        .local_operator()
        .ok_or_else(|| anyhow::anyhow!("operator_address {:?} not present in operators list", config.operator_address))?
        .clone();

    let signer = Arc::new(LocalSigner::load(&local_operator.signing_key_curve, &config.signing_key_path)?);
    let operator_set = config.operator_set()?;

    let persistence: Arc<dyn Persistence> = SledPersistence::open(&config.persistence_path)?;
    let node_state = persistence.load_node_state().await?;

    let keystore = Arc::new(KeyStore::new());
    for version in persistence.list_key_share_versions().await? {
        keystore.add(version);
    }
    if let Some(active) = persistence.get_active_version_epoch().await? {
        keystore.set_active(active);
    }

    let primary_chain = config.chains.first().expect("NodeConfig::validate rejects an empty chain list");
    let provider = Provider::<Http>::try_from(config.chain_rpc_url.as_str())?;
    let chain_signer_wallet = load_chain_signer_wallet(config.chain_signer_key_path(), primary_chain.chain_id)?;
    let chain_client = Arc::new(SignerMiddleware::new(provider, chain_signer_wallet));
    let registry = Arc::new(EthCommitmentRegistry::new(config.registry_address, chain_client.clone()));

    let cancellation = CancellationToken::new();

    let orchestrator = Arc::new(Orchestrator {
        local_address: config.operator_address,
        local_node_id,
        sessions: kms_core::session::SessionMap::new(),
        keystore: keystore.clone(),
        persistence: persistence.clone(),
        registry,
        transport: Arc::new(HttpTransport::default()),
        verifier: Arc::new(OperatorSignatureVerifier),
        signer,
        directory: Arc::new(ConfiguredOperatorDirectory::new(operator_set)),
        peer_probe: Arc::new(HttpPeerProbe::default()),
        cancellation: cancellation.clone(),
        protocol_timeout: primary_chain.protocol_timeout(),
        session_wait_timeout: Duration::from_millis(config.session_wait_timeout_ms),
    });

    let app_state = Arc::new(AppState {
        orchestrator: orchestrator.clone(),
        attestation_verifier: Arc::new(TrustedJsonAttestationVerifier),
        release_registry: Arc::new(InMemoryReleaseRegistry::new()),
        block_interval: primary_chain.block_interval as i64,
    });

    let listener = tokio::net::TcpListener::bind(config.listen_address).await?;
    info!(addr = %config.listen_address, "listening");
    let server_cancellation = cancellation.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, http::router(app_state))
            .with_graceful_shutdown(async move { server_cancellation.cancelled().await })
            .await
    });

    let scheduler_cancellation = cancellation.clone();
    let scheduler_handle = tokio::spawn(run_scheduler(
        orchestrator,
        persistence,
        node_state,
        primary_chain.chain_id,
        primary_chain.block_interval,
        chain_client,
        scheduler_cancellation,
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
        _ = cancellation.cancelled() => {}
    }
    cancellation.cancel();

    let _ = server.await;
    let _ = scheduler_handle.await;
    Ok(())
}

/// Polls the configured chain's block number and feeds each observed value to a
/// [`Scheduler`], launching a protocol session as a background task on every fresh
/// interval boundary (§4.5).
async fn run_scheduler<M: Middleware + 'static>(
    orchestrator: Arc<Orchestrator>,
    persistence: Arc<dyn Persistence>,
    node_state: NodeState,
    chain_id: u64,
    block_interval: u64,
    chain_client: Arc<M>,
    cancellation: CancellationToken,
) {
    let scheduler = match node_state.last_processed_boundary {
        Some(boundary) => Scheduler::resume(block_interval, boundary),
        None => Scheduler::new(block_interval),
    };

    info!(chain_id, block_interval, "scheduler started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(2)) => {}
            _ = cancellation.cancelled() => {
                info!("scheduler stopping");
                return;
            }
        }

        let block = match chain_client.get_block_number().await {
            Ok(block) => block.as_u64(),
            Err(err) => {
                warn!(error = %err, "failed to fetch block number");
                continue;
            }
        };

        if let Some(boundary) = scheduler.observe_block(block) {
            let state = NodeState { last_processed_boundary: Some(boundary) };
            if let Err(err) = persistence.save_node_state(&state).await {
                warn!(error = %err, "failed to persist scheduler boundary");
                continue;
            }

            info!(boundary, "triggering protocol session");
            let orchestrator = orchestrator.clone();
            let cancellation = cancellation.clone();
            tokio::spawn(async move {
                tokio::select! {
                    result = orchestrator.run_session(boundary as i64) => {
                        if let Err(err) = result {
                            warn!(session = boundary, error = %err, "session did not complete");
                        } else {
                            info!(session = boundary, "session finalized");
                        }
                    }
                    _ = cancellation.cancelled() => {}
                }
            });
        }
    }
}
