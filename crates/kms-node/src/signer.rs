//! This node's own transport-envelope signing key, loaded at startup from
//! `NodeConfig::signing_key_path`. Mirrors [`kms_core::operator::SigningKey`] (the public-side
//! tag carried in the operator roster) but holds the private material needed to actually
//! produce a signature over an envelope hash.

use ethers::signers::{LocalWallet, Signer};
use ethers::types::H256;
use kms_core::error::ConfigError;
use kms_core::operator::SigningKey;
use threshold_bls::curve::bls12381::Scalar;
use threshold_bls::sig::SignatureScheme;

type Bn254Scheme = threshold_bls::schemes::bls12_381::G2Scheme;

/// The private counterpart of [`SigningKey`]: whichever curve this operator is configured
/// with, `sign` produces the bytes carried as `AuthenticatedEnvelope::signature`.
pub enum LocalSigner {
    Ecdsa(LocalWallet),
    Bn254(Scalar),
}

impl LocalSigner {
    /// Loads a signer from hex-encoded key material on disk: a 32-byte ECDSA private key, or
    /// a BLS12-381 scalar, depending on `curve`.
    pub fn load(curve: &str, path: &str) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("reading signing key {path}: {e}")))?;
        let hex_str = text.trim().trim_start_matches("0x");
        let bytes = hex::decode(hex_str).map_err(|e| ConfigError::Parse(format!("decoding signing key: {e}")))?;

        match curve {
            "ecdsa" => {
                let wallet = LocalWallet::from_bytes(&bytes)
                    .map_err(|e| ConfigError::Parse(format!("invalid ecdsa key material: {e}")))?;
                Ok(LocalSigner::Ecdsa(wallet))
            }
            "bn254" => {
                let scalar: Scalar = bincode::deserialize(&bytes)
                    .map_err(|e| ConfigError::Parse(format!("decoding bn254 scalar: {e}")))?;
                Ok(LocalSigner::Bn254(scalar))
            }
            other => Err(ConfigError::Parse(format!("unknown signing key curve: {other}"))),
        }
    }

    /// Signs an envelope hash, producing the bytes carried in `AuthenticatedEnvelope::signature`.
    pub fn sign(&self, hash: &[u8; 32]) -> Vec<u8> {
        match self {
            LocalSigner::Ecdsa(wallet) => {
                let signature = wallet
                    .sign_hash(H256::from(*hash))
                    .expect("signing a 32-byte digest never fails");
                let bytes: [u8; 65] = signature.into();
                bytes.to_vec()
            }
            LocalSigner::Bn254(private_key) => {
                Bn254Scheme::sign(private_key, hash).expect("signing a 32-byte digest never fails")
            }
        }
    }

    /// The public counterpart carried in this operator's roster entry.
    pub fn public_signing_key(&self) -> SigningKey {
        match self {
            LocalSigner::Ecdsa(wallet) => SigningKey::Ecdsa(wallet.address()),
            LocalSigner::Bn254(private_key) => {
                let mut public = threshold_bls::curve::bls12381::G2::one();
                threshold_bls::group::Element::mul(&mut public, private_key);
                let bytes = bincode::serialize(&public).expect("G2 serialization is infallible");
                SigningKey::Bn254(bytes)
            }
        }
    }
}
