//! Concrete [`kms_core::transport::SignatureVerifier`] implementations for the two signing
//! curves an operator can use to authenticate transport envelopes (§6): ECDSA (via `ethers`'
//! recovery) and BN254 (the Celo precompile curve, verified against the raw compressed
//! public key bytes carried in the operator's `SigningKey::Bn254`).

use ethers::types::{Address, Signature as EthSignature};
use kms_core::operator::SigningKey;
use kms_core::transport::SignatureVerifier;

/// Verifies envelopes against whichever curve an operator's `SigningKey` declares.
///
/// ECDSA verification recovers the signer address from `(hash, signature)` and compares it
/// to the address carried in `SigningKey::Ecdsa`. BN254 verification is delegated to the
/// curve-native pairing check in `threshold-bls`, since a BN254 "signature" here is really a
/// short BLS signature over the envelope hash rather than an (r, s, v) ECDSA tuple.
#[derive(Debug, Default, Clone, Copy)]
pub struct OperatorSignatureVerifier;

impl SignatureVerifier for OperatorSignatureVerifier {
    fn verify(&self, signing_key: &SigningKey, hash: &[u8; 32], signature: &[u8]) -> bool {
        match signing_key {
            SigningKey::Ecdsa(expected) => verify_ecdsa(*expected, hash, signature),
            SigningKey::Bn254(public_key_bytes) => verify_bn254(public_key_bytes, hash, signature),
        }
    }
}

fn verify_ecdsa(expected: Address, hash: &[u8; 32], signature: &[u8]) -> bool {
    let signature = match EthSignature::try_from(signature) {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    match signature.recover(*hash) {
        Ok(recovered) => recovered == expected,
        Err(_) => false,
    }
}

fn verify_bn254(public_key_bytes: &[u8], hash: &[u8; 32], signature: &[u8]) -> bool {
    use threshold_bls::sig::SignatureScheme;

    let Ok(public_key) = bincode::deserialize::<threshold_bls::curve::bls12381::G2>(public_key_bytes) else {
        return false;
    };
    type Scheme = threshold_bls::schemes::bls12_381::G2Scheme;
    Scheme::verify(&public_key, hash, signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::signers::{LocalWallet, Signer};

    #[tokio::test]
    async fn ecdsa_signature_recovers_to_signer_address() {
        let wallet = LocalWallet::new(&mut rand::thread_rng());
        let address = wallet.address();
        let hash = [7u8; 32];

        let signature = wallet.sign_hash(hash.into()).unwrap();
        let bytes: [u8; 65] = signature.into();

        let verifier = OperatorSignatureVerifier;
        assert!(verifier.verify(&SigningKey::Ecdsa(address), &hash, &bytes));
    }

    #[tokio::test]
    async fn ecdsa_signature_rejects_wrong_address() {
        let wallet = LocalWallet::new(&mut rand::thread_rng());
        let other = LocalWallet::new(&mut rand::thread_rng()).address();
        let hash = [7u8; 32];

        let signature = wallet.sign_hash(hash.into()).unwrap();
        let bytes: [u8; 65] = signature.into();

        let verifier = OperatorSignatureVerifier;
        assert!(!verifier.verify(&SigningKey::Ecdsa(other), &hash, &bytes));
    }
}
