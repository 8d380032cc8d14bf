//! Operator identity and operator sets.
//!
//! Grounded on the upstream `Node`/`Group` pair (index + public key, with a group-wide
//! threshold), generalized with the fields this protocol's transport/authentication layer
//! needs: a reachable socket, a signing key (and curve tag), and a derived node-id.

use ethers::types::Address;
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

use crate::error::ConfigError;
use threshold_bls::curve::bls12381::G2;

/// Curve used by an operator's transport-envelope signing key. Distinct from the
/// BLS12-381 DKG/commitment cryptography: this key authenticates HTTP envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigningKeyCurve {
    Bn254,
    Ecdsa,
}

/// An operator's transport-authentication public key, tagged with its curve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigningKey {
    /// A BN254 public key (Solidity-precompile compatible), raw compressed bytes.
    Bn254(Vec<u8>),
    /// An ECDSA signer identified by the address it recovers to.
    Ecdsa(Address),
}

impl SigningKey {
    pub fn curve(&self) -> SigningKeyCurve {
        match self {
            SigningKey::Bn254(_) => SigningKeyCurve::Bn254,
            SigningKey::Ecdsa(_) => SigningKeyCurve::Ecdsa,
        }
    }
}

/// Derives an operator's 64-bit node-id from its on-chain address: the low 8 bytes of
/// keccak256(address).
pub fn node_id(address: Address) -> u64 {
    let digest = keccak256(address.as_bytes());
    u64::from_be_bytes(digest[24..32].try_into().expect("8 bytes"))
}

/// A single operator in the network: on-chain address, reachable socket, and the
/// transport-authentication signing key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub address: Address,
    pub socket: SocketAddr,
    pub signing_key: SigningKey,
}

impl Operator {
    pub fn node_id(&self) -> u64 {
        node_id(self.address)
    }
}

/// Threshold for an operator count `n`: `floor((2n+2)/3)`, tolerating `n - t` faults under
/// an honest-majority assumption.
pub fn threshold_for(n: usize) -> usize {
    (2 * n + 2) / 3
}

/// A validated set of operators with a derived DKG threshold, plus a lookup from
/// node-id to index for constant-time participant resolution.
///
/// Serializes as just `{operators, threshold}`; the node-id index is rebuilt on
/// deserialization rather than carried across the wire/disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorSet {
    operators: Vec<Operator>,
    threshold: usize,
    index_by_node_id: HashMap<u64, usize>,
}

#[derive(Serialize, Deserialize)]
struct OperatorSetWire {
    operators: Vec<Operator>,
    threshold: usize,
}

impl Serialize for OperatorSet {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        OperatorSetWire {
            operators: self.operators.clone(),
            threshold: self.threshold,
        }
        .serialize(s)
    }
}

impl<'de> Deserialize<'de> for OperatorSet {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let wire = OperatorSetWire::deserialize(d)?;
        let mut index_by_node_id = HashMap::new();
        for (i, op) in wire.operators.iter().enumerate() {
            index_by_node_id.insert(op.node_id(), i);
        }
        Ok(Self {
            operators: wire.operators,
            threshold: wire.threshold,
            index_by_node_id,
        })
    }
}

impl OperatorSet {
    /// Builds a validated operator set, rejecting duplicate addresses and node-id
    /// collisions (a fatal configuration error per the node-id one-way-derivation rule).
    pub fn new(operators: Vec<Operator>) -> Result<Self, ConfigError> {
        let mut seen_addresses = HashSet::new();
        let mut index_by_node_id = HashMap::new();

        for (i, op) in operators.iter().enumerate() {
            if !seen_addresses.insert(op.address) {
                return Err(ConfigError::DuplicateAddress(format!("{:?}", op.address)));
            }

            let id = op.node_id();
            if let Some(&existing) = index_by_node_id.get(&id) {
                let other: &Operator = &operators[existing];
                return Err(ConfigError::NodeIdCollision(
                    format!("{:?}", other.address),
                    format!("{:?}", op.address),
                    id,
                ));
            }
            index_by_node_id.insert(id, i);
        }

        let threshold = threshold_for(operators.len());
        Ok(Self {
            operators,
            threshold,
            index_by_node_id,
        })
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn operators(&self) -> &[Operator] {
        &self.operators
    }

    pub fn contains(&self, node_id: u64) -> bool {
        self.index_by_node_id.contains_key(&node_id)
    }

    pub fn get(&self, node_id: u64) -> Option<&Operator> {
        self.index_by_node_id.get(&node_id).map(|&i| &self.operators[i])
    }

    pub fn node_ids(&self) -> Vec<u64> {
        self.operators.iter().map(Operator::node_id).collect()
    }
}

/// This operator's contribution to the master public key, `commitments[0]`, carried
/// alongside the node-id that produced it. Exists only to give `G2` a name at the call
/// sites that sum contributions across an operator set (spec's invariant 1).
pub type MasterPublicKeyContribution = G2;

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::from_slice(&[byte; 20])
    }

    fn op(byte: u8) -> Operator {
        Operator {
            address: addr(byte),
            socket: "127.0.0.1:9000".parse().unwrap(),
            signing_key: SigningKey::Ecdsa(addr(byte)),
        }
    }

    #[test]
    fn threshold_formula() {
        assert_eq!(threshold_for(3), 2);
        assert_eq!(threshold_for(5), 4);
        assert_eq!(threshold_for(4), 3);
    }

    #[test]
    fn rejects_duplicate_address() {
        let ops = vec![op(1), op(1)];
        assert!(matches!(
            OperatorSet::new(ops),
            Err(ConfigError::DuplicateAddress(_))
        ));
    }

    #[test]
    fn builds_valid_set() {
        let ops = vec![op(1), op(2), op(3)];
        let set = OperatorSet::new(ops).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.threshold(), 2);
        assert!(set.contains(node_id(addr(1))));
    }
}
