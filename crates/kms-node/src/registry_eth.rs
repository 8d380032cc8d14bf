//! On-chain [`CommitmentRegistry`] backed by an `ethers` contract binding, grounded on
//! `dkg-cli`'s hand-rolled `DKG<M>` contract wrapper (`dkg_contract.rs`) — here generated
//! with `ethers::contract::abigen!` against an inline ABI instead of being written out by
//! hand, since the anchoring surface this node needs (`submit`/`get`) is much narrower than
//! the full DKG lifecycle contract the teacher bound.

use async_trait::async_trait;
use ethers::contract::abigen;
use ethers::providers::Middleware;
use ethers::types::{Address, U256};
use std::sync::Arc;

use kms_core::error::AnchorError;
use kms_core::registry::{Anchor, CommitmentRegistry};

abigen!(
    CommitmentRegistryContract,
    r#"[
        function submit(uint256 epoch, bytes32 commitmentHash, bytes32 merkleRoot) external
        function get(uint256 epoch, uint256 operatorNodeId) external view returns (bytes32, bytes32, bool)
    ]"#,
);

/// Anchors commitments to a deployed `CommitmentRegistry` contract. `M` is the `ethers`
/// middleware stack (provider plus, where needed, a signer) the node was configured with.
pub struct EthCommitmentRegistry<M> {
    contract: CommitmentRegistryContract<M>,
}

impl<M: Middleware + 'static> EthCommitmentRegistry<M> {
    pub fn new(address: Address, client: Arc<M>) -> Self {
        Self { contract: CommitmentRegistryContract::new(address, client) }
    }
}

#[async_trait]
impl<M: Middleware + 'static> CommitmentRegistry for EthCommitmentRegistry<M> {
    async fn submit(&self, epoch: i64, anchor: Anchor) -> Result<(), AnchorError> {
        self.contract
            .submit(U256::from(epoch), anchor.commitment_hash, anchor.merkle_root)
            .send()
            .await
            .map_err(|e| AnchorError::Registry(e.to_string()))?
            .await
            .map_err(|e| AnchorError::Registry(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, epoch: i64, operator_node_id: u64) -> Result<Option<Anchor>, AnchorError> {
        let (commitment_hash, merkle_root, exists) = self
            .contract
            .get(U256::from(epoch), U256::from(operator_node_id))
            .call()
            .await
            .map_err(|e| AnchorError::Registry(e.to_string()))?;

        if !exists {
            return Ok(None);
        }
        Ok(Some(Anchor { commitment_hash, merkle_root }))
    }
}
