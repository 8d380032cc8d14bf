//! TEE attestation verification is opaque per spec (§1 Non-goals): this module only owns the
//! trait boundary `/secrets` authenticates against, plus a fixed-claim stand-in used by tests
//! and local development where no real attestation service is wired up.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Claims extracted from a verified attestation document. The only field the `/secrets`
/// handler inspects is `image_digest`, checked against the release registry's record (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationClaims {
    pub app_id: String,
    pub image_digest: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AttestationError {
    #[error("unsupported attestation method: {0}")]
    UnsupportedMethod(String),

    #[error("attestation document failed verification")]
    Invalid,
}

/// Verifies an opaque attestation document (shape depends on `attestation_method`) and
/// returns the claims it attests to. The concrete verifier (TEE quote validation, etc.) is
/// out of scope; this crate only needs something implementing this trait.
#[async_trait]
pub trait AttestationVerifier: Send + Sync {
    async fn verify(
        &self,
        attestation_method: &str,
        attestation: &[u8],
    ) -> Result<AttestationClaims, AttestationError>;
}

/// A verifier that trusts a JSON-encoded [`AttestationClaims`] document verbatim. Used in
/// integration tests (S6) and local development profiles; never wired up against a real
/// deployment's `/secrets` endpoint.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrustedJsonAttestationVerifier;

#[async_trait]
impl AttestationVerifier for TrustedJsonAttestationVerifier {
    async fn verify(
        &self,
        attestation_method: &str,
        attestation: &[u8],
    ) -> Result<AttestationClaims, AttestationError> {
        if attestation_method != "trusted-json" {
            return Err(AttestationError::UnsupportedMethod(attestation_method.to_string()));
        }
        serde_json::from_slice(attestation).map_err(|_| AttestationError::Invalid)
    }
}
