mod bls;
pub use bls::{BLSError, G1Scheme, G2Scheme};

mod tbls;
pub use tbls::{IndexSerializerError, ThresholdError};

#[allow(clippy::module_inception)]
mod sig;
pub use sig::*;
