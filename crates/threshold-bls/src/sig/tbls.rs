//! Threshold signatures: partial signing, partial verification, and Lagrange-based
//! aggregation, for any [`SignatureScheme`].
use crate::poly::{Eval, Poly, PolyError};
use crate::sig::{
    Index, Partial, Scheme, Share, SignatureScheme, SignatureSchemeExt, ThresholdScheme,
    ThresholdSchemeExt,
};
use std::convert::TryInto;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexSerializerError {
    #[error("signature did not contain an index, need at least {1} bytes, got {0}")]
    InvalidLength(usize, usize),
    #[error("could not deserialize index: {0}")]
    IndexError(#[from] std::array::TryFromSliceError),
}

#[derive(Debug, Error)]
pub enum ThresholdError<I: SignatureScheme> {
    #[error("could not recover signature: {0}")]
    PolyError(PolyError),

    #[error(transparent)]
    IndexError(#[from] IndexSerializerError),

    #[error("could not deserialize partial signature: {0}")]
    SerializationError(#[from] bincode::Error),

    #[error("signing error {0}")]
    SignatureError(I::Error),

    #[error("not enough partial signatures: {0}/{1}")]
    NotEnoughPartialSignatures(usize, usize),
}

/// Helper trait for serializing/deserializing the share index alongside a partial signature.
pub trait Serializer {
    fn extract(partial: &[u8]) -> Result<(Index, Vec<u8>), IndexSerializerError> {
        extract_index(partial)
    }

    fn inject(idx: Index, partial: &[u8]) -> Vec<u8> {
        inject_index(idx, partial)
    }
}

impl<I: SignatureScheme> Serializer for I {}

impl<I: SignatureScheme> ThresholdScheme for I {
    type Error = ThresholdError<I>;

    fn partial_sign(
        private: &Share<Self::Private>,
        msg: &[u8],
    ) -> Result<Partial, <Self as ThresholdScheme>::Error> {
        let sig = Self::sign(&private.private, msg).map_err(ThresholdError::SignatureError)?;
        Ok(inject_index(private.index, &sig))
    }

    fn partial_verify(
        public: &Poly<Self::Public>,
        msg: &[u8],
        partial: &[u8],
    ) -> Result<(), <Self as ThresholdScheme>::Error> {
        let (idx, bls_sig) = extract_index(partial)?;
        let public_i = public.eval(idx);
        Self::verify(&public_i.value, msg, &bls_sig).map_err(ThresholdError::SignatureError)
    }

    fn aggregate(
        threshold: usize,
        partials: &[Partial],
    ) -> Result<Vec<u8>, <Self as ThresholdScheme>::Error> {
        if threshold > partials.len() {
            return Err(ThresholdError::NotEnoughPartialSignatures(
                partials.len(),
                threshold,
            ));
        }

        let valid_partials: Vec<Eval<Self::Signature>> = partials
            .iter()
            .map(|s| -> Result<Eval<Self::Signature>, ThresholdError<I>> {
                let (idx, bls_sig) = extract_index(s)?;
                let value: Self::Signature = bincode::deserialize(&bls_sig)?;
                Ok(Eval { value, index: idx })
            })
            .filter_map(Result::ok)
            .collect();

        let recovered_sig =
            Poly::<Self::Signature>::recover(threshold, valid_partials).map_err(ThresholdError::PolyError)?;
        Ok(bincode::serialize(&recovered_sig)?)
    }

    fn verify(public: &Self::Public, msg: &[u8], sig: &[u8]) -> Result<(), Self::Error> {
        <Self as SignatureScheme>::verify(public, msg, sig).map_err(ThresholdError::SignatureError)
    }
}

impl<I: SignatureSchemeExt> ThresholdSchemeExt for I {
    fn partial_sign_without_hashing(
        private: &Share<Self::Private>,
        msg: &[u8],
    ) -> Result<Partial, <Self as ThresholdScheme>::Error> {
        let sig = Self::sign_without_hashing(&private.private, msg)
            .map_err(ThresholdError::SignatureError)?;
        Ok(inject_index(private.index, &sig))
    }

    fn partial_verify_without_hashing(
        public: &Poly<Self::Public>,
        msg: &[u8],
        partial: &[u8],
    ) -> Result<(), <Self as ThresholdScheme>::Error> {
        let (idx, bls_sig) = extract_index(partial)?;
        let public_i = public.eval(idx);
        Self::verify_without_hashing(&public_i.value, msg, &bls_sig)
            .map_err(ThresholdError::SignatureError)
    }
}

fn inject_index(index: Index, sig: &[u8]) -> Vec<u8> {
    let mut res = index.to_le_bytes().to_vec();
    res.extend_from_slice(sig);
    res
}

fn extract_index(sig: &[u8]) -> Result<(Index, Vec<u8>), IndexSerializerError> {
    let size_idx = std::mem::size_of::<Index>();
    if sig.len() < size_idx {
        return Err(IndexSerializerError::InvalidLength(sig.len(), size_idx));
    }

    let (int_bytes, rest) = sig.split_at(size_idx);
    let index = Index::from_le_bytes(int_bytes.try_into()?);
    Ok((index, rest.to_vec()))
}
