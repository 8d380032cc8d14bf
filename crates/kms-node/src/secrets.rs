//! `/secrets`: TEE-attested retrieval of a release's encrypted environment plus this node's
//! partial application-key signature, RSA-encrypted under an ephemeral key supplied by the
//! attested caller (§6).

use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use serde::{Deserialize, Serialize};

use crate::attestation::{AttestationError, AttestationVerifier};
use crate::release::{ReleaseError, ReleaseRegistry};
use kms_core::client::partial_sign;
use kms_core::keystore::KeyStore;

#[derive(Debug, Deserialize)]
pub struct SecretsRequestV1 {
    pub app_id: String,
    pub attestation_method: String,
    pub attestation: Vec<u8>,
    /// DER-encoded RSA public key (PKCS#1) the response is encrypted under.
    pub rsa_pubkey_tmp: Vec<u8>,
    pub attest_time: i64,
}

#[derive(Debug, Serialize)]
pub struct SecretsResponseV1 {
    pub encrypted_env: Vec<u8>,
    pub public_env: Vec<u8>,
    pub encrypted_partial_sig: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum SecretsError {
    #[error("attestation failed: {0}")]
    Attestation(#[from] AttestationError),

    #[error("release digest {claimed} does not match attested image digest {attested}")]
    DigestMismatch { claimed: String, attested: String },

    #[error("release not found: {0}")]
    Release(#[from] ReleaseError),

    #[error("no active key share version available")]
    NoActiveVersion,

    #[error("partial signature failed: {0}")]
    Signing(#[from] threshold_bls::sig::BLSError),

    #[error("invalid RSA public key material: {0}")]
    InvalidRsaKey(String),

    #[error("RSA encryption failed: {0}")]
    Encryption(String),
}

/// §6's `/secrets` handler logic: verify attestation, require the release's image digest to
/// match what was attested, pick a key version at `attest_time` (falling back to the active
/// one), compute a partial signature over `app_id`, and RSA-encrypt it under the caller's
/// ephemeral key.
pub async fn handle_secrets_request(
    attestation_verifier: &dyn AttestationVerifier,
    release_registry: &dyn ReleaseRegistry,
    keystore: &KeyStore,
    block_interval: i64,
    request: SecretsRequestV1,
) -> Result<SecretsResponseV1, SecretsError> {
    let claims = attestation_verifier
        .verify(&request.attestation_method, &request.attestation)
        .await?;

    let release = release_registry.get(&request.app_id).await?;
    if claims.image_digest != release.image_digest {
        return Err(SecretsError::DigestMismatch {
            claimed: release.image_digest,
            attested: claims.image_digest,
        });
    }

    let version = keystore
        .get_at_time(request.attest_time, block_interval)
        .or_else(|| keystore.get_active())
        .ok_or(SecretsError::NoActiveVersion)?;

    let partial = partial_sign(&version.private_share, request.app_id.as_bytes())?;

    let rsa_key = RsaPublicKey::from_pkcs1_der(&request.rsa_pubkey_tmp)
        .map_err(|e| SecretsError::InvalidRsaKey(e.to_string()))?;
    let encrypted_partial_sig = rsa_key
        .encrypt(&mut rand::rngs::OsRng, Pkcs1v15Encrypt, &partial)
        .map_err(|e| SecretsError::Encryption(e.to_string()))?;

    Ok(SecretsResponseV1 {
        encrypted_env: release.encrypted_env,
        public_env: release.public_env,
        encrypted_partial_sig,
    })
}
