//! The on-chain commitment anchor: an abstract interface plus the retry policy around it.
//!
//! The concrete contract binding is out of scope here (it belongs to `kms-node`, wired up
//! against whatever `ethers::contract` instance the node is configured with); this module
//! owns only the trait boundary and the §4.4 retry/backoff behavior, grounded on
//! `dkg-cli`'s `wait_for_phase` polling loop pattern of a bounded retry count with
//! cancellation-aware sleeps between attempts.

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::AnchorError;

/// One epoch's anchored value: the dealer's own commitment hash and the merkle root over
/// the acks it collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
    pub commitment_hash: [u8; 32],
    pub merkle_root: [u8; 32],
}

/// The external registry a dealer anchors its commitment hash and ack-merkle-root to, and
/// that peers consult during Phase 4 verification.
#[async_trait]
pub trait CommitmentRegistry: Send + Sync {
    async fn submit(&self, epoch: i64, anchor: Anchor) -> Result<(), AnchorError>;
    async fn get(&self, epoch: i64, operator_node_id: u64) -> Result<Option<Anchor>, AnchorError>;
}

/// Fixed backoff schedule: 2s, 4s, 8s between the three attempts.
const BACKOFFS: [Duration; 2] = [Duration::from_secs(2), Duration::from_secs(4)];
const MAX_ATTEMPTS: u32 = 3;

/// Submits to `registry` with up to [`MAX_ATTEMPTS`] tries, sleeping the fixed backoff
/// schedule between failures. A cancellation fired mid-backoff aborts immediately rather
/// than completing the sleep, per §4.4 and §5's "suspension points honor cancellation"
/// rule. Anchor failure after exhausting retries aborts the owning session (§7).
pub async fn submit_with_retry(
    registry: &dyn CommitmentRegistry,
    epoch: i64,
    anchor: Anchor,
    cancellation: &CancellationToken,
) -> Result<(), AnchorError> {
    for attempt in 0..MAX_ATTEMPTS {
        match registry.submit(epoch, anchor).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                tracing::warn!(attempt, epoch, error = %err, "anchor submission failed");
                if attempt + 1 == MAX_ATTEMPTS {
                    return Err(AnchorError::RetriesExhausted(MAX_ATTEMPTS));
                }
                tokio::select! {
                    _ = tokio::time::sleep(BACKOFFS[attempt as usize]) => {}
                    _ = cancellation.cancelled() => return Err(AnchorError::Cancelled),
                }
            }
        }
    }
    unreachable!("loop returns on its final iteration")
}

/// An in-memory stand-in for the on-chain contract [`EthCommitmentRegistry`] binds against in
/// production, shared by every simulated operator in a test so one dealer's anchor is visible
/// to every other operator's `get`.
///
/// [`EthCommitmentRegistry`]: https://docs.rs/kms-node (binds `submit`'s `msg.sender` to an
/// operator's chain address on-chain; this stand-in has no transaction sender to recover the
/// submitting operator from, so each simulated operator instead gets its own [`for_operator`]
/// handle that remembers which node id its `submit` calls anchor under).
///
/// [`for_operator`]: InMemoryCommitmentRegistry::for_operator
#[derive(Default)]
pub struct InMemoryCommitmentRegistry {
    anchors: dashmap::DashMap<(i64, u64), Anchor>,
}

impl InMemoryCommitmentRegistry {
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::default())
    }

    /// A view of this shared registry bound to one operator's node id, for use as that
    /// operator's `CommitmentRegistry` collaborator.
    pub fn for_operator(self: &std::sync::Arc<Self>, node_id: u64) -> InMemoryRegistryHandle {
        InMemoryRegistryHandle { shared: self.clone(), node_id }
    }
}

/// One operator's bound view of a shared [`InMemoryCommitmentRegistry`].
pub struct InMemoryRegistryHandle {
    shared: std::sync::Arc<InMemoryCommitmentRegistry>,
    node_id: u64,
}

#[async_trait]
impl CommitmentRegistry for InMemoryRegistryHandle {
    async fn submit(&self, epoch: i64, anchor: Anchor) -> Result<(), AnchorError> {
        self.shared.anchors.insert((epoch, self.node_id), anchor);
        Ok(())
    }

    async fn get(&self, epoch: i64, operator_node_id: u64) -> Result<Option<Anchor>, AnchorError> {
        Ok(self.shared.anchors.get(&(epoch, operator_node_id)).map(|e| *e.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakyRegistry {
        fail_until: u32,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl CommitmentRegistry for FlakyRegistry {
        async fn submit(&self, _epoch: i64, _anchor: Anchor) -> Result<(), AnchorError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_until {
                Err(AnchorError::Registry("flaky".into()))
            } else {
                Ok(())
            }
        }

        async fn get(&self, _epoch: i64, _operator_node_id: u64) -> Result<Option<Anchor>, AnchorError> {
            Ok(None)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_on_third_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let registry = FlakyRegistry { fail_until: 2, calls: calls.clone() };
        let token = CancellationToken::new();
        let anchor = Anchor { commitment_hash: [0; 32], merkle_root: [0; 32] };

        let result = submit_with_retry(&registry, 1, anchor, &token).await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_three_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let registry = FlakyRegistry { fail_until: 10, calls: calls.clone() };
        let token = CancellationToken::new();
        let anchor = Anchor { commitment_hash: [0; 32], merkle_root: [0; 32] };

        let result = submit_with_retry(&registry, 1, anchor, &token).await;
        assert!(matches!(result, Err(AnchorError::RetriesExhausted(3))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_aborts_during_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let registry = FlakyRegistry { fail_until: 10, calls: calls.clone() };
        let token = CancellationToken::new();
        token.cancel();
        let anchor = Anchor { commitment_hash: [0; 32], merkle_root: [0; 32] };

        let result = submit_with_retry(&registry, 1, anchor, &token).await;
        assert!(matches!(result, Err(AnchorError::Cancelled)));
    }

    #[tokio::test]
    async fn in_memory_registry_shares_anchors_across_operator_handles() {
        let shared = InMemoryCommitmentRegistry::new();
        let dealer = shared.for_operator(7);
        let peer = shared.for_operator(9);

        let anchor = Anchor { commitment_hash: [3; 32], merkle_root: [4; 32] };
        dealer.submit(1, anchor).await.unwrap();

        assert_eq!(peer.get(1, 7).await.unwrap(), Some(anchor));
        assert_eq!(peer.get(1, 9).await.unwrap(), None);
        assert_eq!(peer.get(2, 7).await.unwrap(), None);
    }
}
