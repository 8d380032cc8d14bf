//! Node configuration: a TOML file parsed into [`NodeConfig`], following the upstream
//! `chainflip-backend` settings idiom (a plain `serde::Deserialize` struct loaded from a
//! file) rather than the teacher's ad-hoc `gumdrop` CLI options, since this node has enough
//! standing configuration (per-chain intervals/timeouts, listen address, persistence path,
//! registry address) to warrant a config file with CLI overrides layered on top.

use ethers::types::Address;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use kms_core::error::ConfigError;
use kms_core::operator::{Operator, OperatorSet, SigningKey};

/// Per-chain scheduling parameters (§4.5): how often the scheduler triggers a session, and
/// how long a triggered session is allowed to run before its deadline expires.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub block_interval: u64,
    pub protocol_timeout_secs: u64,
}

impl ChainConfig {
    pub fn protocol_timeout(&self) -> Duration {
        Duration::from_secs(self.protocol_timeout_secs)
    }
}

/// Top-level node configuration, loaded once at startup. A failure to load or validate this
/// is a [`ConfigError`], fatal before the node ever binds a socket (§7).
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Address this node's HTTP server binds to.
    pub listen_address: SocketAddr,
    /// This node's own on-chain address (must match an entry in `operators`).
    pub operator_address: Address,
    /// Path to the operator's transport-signing private key (hex-encoded, 32 bytes).
    pub signing_key_path: String,
    /// Path to the hex-encoded ECDSA key used to sign `CommitmentRegistry.submit`
    /// transactions. Defaults to `signing_key_path` when this node's transport curve is
    /// already ECDSA; required when the transport curve is BN254, since that key material
    /// isn't a valid secp256k1 scalar.
    #[serde(default)]
    pub chain_signer_key_path: Option<String>,
    /// Path to the directory `SledPersistence` opens its database under.
    pub persistence_path: String,
    /// The on-chain `CommitmentRegistry` contract address.
    pub registry_address: Address,
    /// Endpoint of the chain client used for both the registry and the block stream.
    pub chain_rpc_url: String,
    /// How long a handler waits for an in-flight session it doesn't yet know about
    /// (§5's "wait-for-entry" primitive), in milliseconds.
    pub session_wait_timeout_ms: u64,
    /// Per-chain scheduler configuration, keyed by `chain_id`.
    pub chains: Vec<ChainConfig>,
    /// The operator set this node currently believes is in force; refreshed by the
    /// peering fetcher ahead of each scheduled boundary (§4.5).
    pub operators: Vec<OperatorConfig>,
}

/// One operator entry as it appears in the config file; converted into
/// [`kms_core::operator::Operator`] at load time.
#[derive(Debug, Clone, Deserialize)]
pub struct OperatorConfig {
    pub address: Address,
    pub socket: SocketAddr,
    pub signing_key_curve: String,
    /// ECDSA: hex address the signature recovers to. BN254: hex-encoded compressed pubkey.
    pub signing_key_material: String,
}

impl OperatorConfig {
    /// Converts a config entry into the [`kms_core::operator::Operator`] the protocol
    /// actually operates on.
    pub fn to_operator(&self) -> Result<Operator, ConfigError> {
        let signing_key = match self.signing_key_curve.as_str() {
            "ecdsa" => {
                let address = Address::from_str(self.signing_key_material.trim_start_matches("0x"))
                    .map_err(|e| ConfigError::Parse(format!("invalid ecdsa operator address: {e}")))?;
                SigningKey::Ecdsa(address)
            }
            "bn254" => {
                let bytes = hex::decode(self.signing_key_material.trim_start_matches("0x"))
                    .map_err(|e| ConfigError::Parse(format!("invalid bn254 public key: {e}")))?;
                SigningKey::Bn254(bytes)
            }
            other => return Err(ConfigError::Parse(format!("unknown signing key curve: {other}"))),
        };
        Ok(Operator { address: self.address, socket: self.socket, signing_key })
    }
}

impl NodeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Parse(format!("reading config file: {e}")))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.chains.is_empty() {
            return Err(ConfigError::Missing("chains"));
        }
        if self.operators.is_empty() {
            return Err(ConfigError::Missing("operators"));
        }

        let mut seen_chain_ids = HashMap::new();
        for chain in &self.chains {
            if seen_chain_ids.insert(chain.chain_id, ()).is_some() {
                return Err(ConfigError::InvalidChainId(chain.chain_id));
            }
            if chain.block_interval == 0 {
                return Err(ConfigError::Parse(format!(
                    "chain {} has a zero block_interval",
                    chain.chain_id
                )));
            }
        }

        Ok(())
    }

    pub fn chain(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }

    /// This node's own entry in `operators`, matched by `operator_address`.
    pub fn local_operator(&self) -> Option<&OperatorConfig> {
        self.operators.iter().find(|o| o.address == self.operator_address)
    }

    /// Path to the hex-encoded ECDSA key this node signs `CommitmentRegistry.submit`
    /// transactions with: `chain_signer_key_path` when set, otherwise `signing_key_path`.
    pub fn chain_signer_key_path(&self) -> &str {
        self.chain_signer_key_path.as_deref().unwrap_or(&self.signing_key_path)
    }

    /// Builds the validated [`OperatorSet`] this configuration describes (§3's no-duplicate,
    /// no-node-id-collision invariant).
    pub fn operator_set(&self) -> Result<OperatorSet, ConfigError> {
        let operators = self.operators.iter().map(OperatorConfig::to_operator).collect::<Result<Vec<_>, _>>()?;
        OperatorSet::new(operators)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        listen_address = "127.0.0.1:8080"
        operator_address = "0x0000000000000000000000000000000000000001"
        signing_key_path = "/tmp/node.key"
        persistence_path = "/tmp/kms-node-db"
        registry_address = "0x0000000000000000000000000000000000000002"
        chain_rpc_url = "http://127.0.0.1:8545"
        session_wait_timeout_ms = 5000

        [[chains]]
        chain_id = 42220
        block_interval = 100
        protocol_timeout_secs = 120

        [[operators]]
        address = "0x0000000000000000000000000000000000000001"
        socket = "127.0.0.1:9001"
        signing_key_curve = "ecdsa"
        signing_key_material = "0x0000000000000000000000000000000000000001"
    "#;

    #[test]
    fn parses_a_well_formed_config() {
        let config = NodeConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.chains.len(), 1);
        assert_eq!(config.chain(42220).unwrap().block_interval, 100);
        assert!(config.chain(1).is_none());
    }

    #[test]
    fn rejects_empty_chain_list() {
        let without_chains = SAMPLE.replace(
            "[[chains]]\n        chain_id = 42220\n        block_interval = 100\n        protocol_timeout_secs = 120",
            "",
        );
        assert!(matches!(
            NodeConfig::parse(&without_chains),
            Err(ConfigError::Missing("chains"))
        ));
    }

    #[test]
    fn resolves_local_operator_and_defaults_chain_signer_path() {
        let config = NodeConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.local_operator().unwrap().socket.to_string(), "127.0.0.1:9001");
        assert_eq!(config.chain_signer_key_path(), "/tmp/node.key");
    }

    #[test]
    fn builds_operator_set_from_config() {
        let config = NodeConfig::parse(SAMPLE).unwrap();
        let set = config.operator_set().unwrap();
        assert_eq!(set.len(), 1);
    }
}
