//! The axum HTTP surface (§6): the four protocol delivery endpoints (mirrored under
//! `/dkg/*` and `/reshare/*`, since the wire shape is identical and the session itself
//! already knows which kind it is), `/pubkey`, `/app/sign`, and `/secrets`.
//!
//! Grounded on `http_verifier_server`'s axum-plus-`Arc<State>` layout: one `Router`, one
//! shared state handle, `tower-http`'s `TraceLayer`/`CorsLayer`, JSON bodies throughout.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use kms_core::client::partial_sign;
use kms_core::transport::{AckMessage, AuthenticatedEnvelope, BroadcastMessage, CommitmentMessage, ShareMessage};
use threshold_bls::curve::bls12381::G2;

use crate::attestation::AttestationVerifier;
use crate::orchestrator::{IngestError, Orchestrator};
use crate::release::ReleaseRegistry;
use crate::secrets::{handle_secrets_request, SecretsError, SecretsRequestV1};

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub attestation_verifier: Arc<dyn AttestationVerifier>,
    pub release_registry: Arc<dyn ReleaseRegistry>,
    pub block_interval: i64,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/dkg/commitment", post(commitment_handler))
        .route("/reshare/commitment", post(commitment_handler))
        .route("/dkg/share", post(share_handler))
        .route("/reshare/share", post(share_handler))
        .route("/dkg/ack", post(ack_handler))
        .route("/reshare/ack", post(ack_handler))
        .route("/dkg/broadcast", post(broadcast_handler))
        .route("/reshare/broadcast", post(broadcast_handler))
        .route("/pubkey", get(pubkey_handler))
        .route("/app/sign", post(app_sign_handler))
        .route("/secrets", post(secrets_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = match &self {
            IngestError::Auth(_) => StatusCode::UNAUTHORIZED,
            IngestError::NoSession(_) => StatusCode::NOT_FOUND,
            IngestError::AnchorUnavailable(_, _) => StatusCode::NOT_FOUND,
            IngestError::Anchor(_) => StatusCode::BAD_GATEWAY,
            IngestError::BroadcastInvalid => StatusCode::BAD_REQUEST,
        };
        (status, self.to_string()).into_response()
    }
}

async fn commitment_handler(
    State(state): State<Arc<AppState>>,
    Json(envelope): Json<AuthenticatedEnvelope<CommitmentMessage>>,
) -> Result<StatusCode, IngestError> {
    state.orchestrator.ingest_commitment(envelope).await?;
    Ok(StatusCode::OK)
}

async fn share_handler(
    State(state): State<Arc<AppState>>,
    Json(envelope): Json<AuthenticatedEnvelope<ShareMessage>>,
) -> Result<StatusCode, IngestError> {
    state.orchestrator.ingest_share(envelope).await?;
    Ok(StatusCode::OK)
}

async fn ack_handler(
    State(state): State<Arc<AppState>>,
    Json(envelope): Json<AuthenticatedEnvelope<AckMessage>>,
) -> Result<StatusCode, IngestError> {
    state.orchestrator.ingest_ack(envelope).await?;
    Ok(StatusCode::OK)
}

async fn broadcast_handler(
    State(state): State<Arc<AppState>>,
    Json(envelope): Json<AuthenticatedEnvelope<BroadcastMessage>>,
) -> Result<StatusCode, IngestError> {
    state.orchestrator.ingest_broadcast(envelope).await?;
    Ok(StatusCode::OK)
}

/// This node's current active key-share version, for peers deciding genesis vs. reshare
/// (§4.5) and for clients assembling a quorum of operators to query for partials (§4.7).
#[derive(Debug, Serialize, Deserialize)]
pub struct PubkeyResponse {
    pub operator_address: Address,
    pub commitments: Vec<G2>,
    pub version: i64,
    pub is_active: bool,
}

async fn pubkey_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.orchestrator.keystore.get_active() {
        Some(version) => Json(PubkeyResponse {
            operator_address: state.orchestrator.local_address,
            commitments: version.commitments,
            version: version.epoch,
            is_active: true,
        })
        .into_response(),
        None => Json(PubkeyResponse {
            operator_address: state.orchestrator.local_address,
            commitments: vec![],
            version: 0,
            is_active: false,
        })
        .into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct AppSignRequest {
    app_id: String,
}

#[derive(Debug, Serialize)]
struct AppSignResponse {
    operator_address: Address,
    dealer_node_id: u64,
    partial_signature: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
enum AppSignError {
    #[error("no active key share version available")]
    NoActiveVersion,

    #[error("failed to produce partial signature: {0}")]
    Signing(#[from] threshold_bls::sig::BLSError),
}

impl IntoResponse for AppSignError {
    fn into_response(self) -> Response {
        let status = match self {
            AppSignError::NoActiveVersion => StatusCode::SERVICE_UNAVAILABLE,
            AppSignError::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// §4.7's node-side step: a threshold application-key partial, signed over `app_id` with
/// this node's current active share. `version.commitments` holds only this node's own
/// dealt contribution (§3), not a per-node verification key for the combined
/// `private_share` (the sum of every dealer's share in `V`), so there is no public value
/// on hand here to self-check the partial against — verification happens client-side,
/// against the recovered `app_sk` (§4.7).
async fn app_sign_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AppSignRequest>,
) -> Result<Json<AppSignResponse>, AppSignError> {
    let version = state.orchestrator.keystore.get_active().ok_or(AppSignError::NoActiveVersion)?;
    let partial = partial_sign(&version.private_share, request.app_id.as_bytes())?;

    Ok(Json(AppSignResponse {
        operator_address: state.orchestrator.local_address,
        dealer_node_id: state.orchestrator.local_node_id,
        partial_signature: partial,
    }))
}

impl IntoResponse for SecretsError {
    fn into_response(self) -> Response {
        let status = match &self {
            SecretsError::Attestation(_) => StatusCode::UNAUTHORIZED,
            SecretsError::DigestMismatch { .. } => StatusCode::FORBIDDEN,
            SecretsError::Release(_) => StatusCode::NOT_FOUND,
            SecretsError::NoActiveVersion => StatusCode::SERVICE_UNAVAILABLE,
            SecretsError::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SecretsError::InvalidRsaKey(_) => StatusCode::BAD_REQUEST,
            SecretsError::Encryption(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

async fn secrets_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SecretsRequestV1>,
) -> Result<Json<crate::secrets::SecretsResponseV1>, SecretsError> {
    let response = handle_secrets_request(
        state.attestation_verifier.as_ref(),
        state.release_registry.as_ref(),
        &state.orchestrator.keystore,
        state.block_interval,
        request,
    )
    .await?;
    Ok(Json(response))
}
