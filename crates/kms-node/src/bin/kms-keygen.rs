//! Generates this operator's transport-signing key material (§6's `SigningKey`): either a
//! fresh ECDSA wallet or a BLS12-381 (BN254-tagged) scalar, written hex-encoded to disk in
//! the format [`kms_node::signer::LocalSigner::load`] expects. Prints the `[[operators]]`
//! TOML snippet the operator publishes to peers for their `kms-node.toml`.

use clap::{Parser, ValueEnum};
use ethers::signers::{LocalWallet, Signer};
use rand::thread_rng;
use threshold_bls::curve::bls12381::{Scalar, G2};
use threshold_bls::group::Element;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Curve {
    Ecdsa,
    Bn254,
}

#[derive(Parser)]
#[command(author, version, about = "Generates an operator's transport-signing key")]
struct Cli {
    /// Which curve to generate a key for.
    #[arg(long, value_enum)]
    curve: Curve,

    /// Where to write the hex-encoded private key material.
    #[arg(long)]
    out: std::path::PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.curve {
        Curve::Ecdsa => {
            let wallet = LocalWallet::new(&mut thread_rng());
            let bytes = wallet.signer().to_bytes();
            std::fs::write(&cli.out, hex::encode(bytes))?;
            println!("[[operators]]");
            println!("address = \"{:?}\"", wallet.address());
            println!("signing_key_curve = \"ecdsa\"");
            println!("signing_key_material = \"{:?}\"", wallet.address());
        }
        Curve::Bn254 => {
            let private_key = Scalar::rand(&mut thread_rng());
            let bytes = bincode::serialize(&private_key)?;
            std::fs::write(&cli.out, hex::encode(bytes))?;

            let mut public_key = G2::one();
            public_key.mul(&private_key);
            let public_bytes = bincode::serialize(&public_key)?;
            println!("[[operators]]");
            println!("address = \"0x...\" # this operator's on-chain address, unrelated to the bn254 key above");
            println!("signing_key_curve = \"bn254\"");
            println!("signing_key_material = \"0x{}\"", hex::encode(public_bytes));
        }
    }

    println!("wrote private key material to {}", cli.out.display());
    Ok(())
}
