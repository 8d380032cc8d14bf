//! The scheduler's two opaque collaborators (§4.5): a source for "the current operator set"
//! and a way to probe a peer for whether it already holds an active key-share version. Both
//! are out of scope for this crate's core protocol (§1) — the concrete backing here is the
//! static roster from [`crate::config::NodeConfig`] plus an HTTP probe of each peer's
//! `/pubkey` endpoint, which is enough to drive the genesis/reshare/join decision without a
//! real on-chain membership registry.

use async_trait::async_trait;
use ethers::types::Address;
use kms_core::operator::{Operator, OperatorSet};

use crate::http::PubkeyResponse;

/// Supplies the operator set the scheduler should use for a freshly triggered boundary.
/// A real deployment would refresh this from an on-chain membership registry each boundary;
/// this crate's registry abstraction ([`kms_core::registry::CommitmentRegistry`]) covers only
/// commitment anchoring, so membership itself is taken from configuration.
pub trait OperatorDirectory: Send + Sync {
    fn current_operators(&self) -> OperatorSet;
}

/// An [`OperatorDirectory`] backed by the static roster in [`crate::config::NodeConfig`].
pub struct ConfiguredOperatorDirectory {
    operators: OperatorSet,
}

impl ConfiguredOperatorDirectory {
    pub fn new(operators: OperatorSet) -> Self {
        Self { operators }
    }
}

impl OperatorDirectory for ConfiguredOperatorDirectory {
    fn current_operators(&self) -> OperatorSet {
        self.operators.clone()
    }
}

/// Probes a single peer for whether it already holds an active key-share version, used by
/// the scheduler (§4.5) to distinguish "join an existing sharing by reshare" from "this is a
/// genesis DKG, nobody has ever finalized a sharing before."
#[async_trait]
pub trait PeerProbe: Send + Sync {
    async fn probe_active_version(&self, peer: &Operator) -> Option<PubkeyResponse>;
}

/// Probes peers over HTTP by calling their `GET /pubkey` endpoint.
pub struct HttpPeerProbe {
    client: reqwest::Client,
}

impl Default for HttpPeerProbe {
    fn default() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

#[async_trait]
impl PeerProbe for HttpPeerProbe {
    async fn probe_active_version(&self, peer: &Operator) -> Option<PubkeyResponse> {
        let url = format!("http://{}/pubkey", peer.socket);
        let response = self.client.get(&url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.json::<PubkeyResponse>().await.ok()
    }
}

/// Returns `true` (and hence "join-by-reshare") the moment any peer other than `local` reports
/// an active version. A peer that is unreachable or returns no active version is silently
/// skipped — peer probing is best-effort, matching §7's "transient transport failure" category.
pub async fn network_has_prior_epoch(probe: &dyn PeerProbe, peers: &[Operator], local: Address) -> bool {
    for peer in peers {
        if peer.address == local {
            continue;
        }
        if let Some(info) = probe.probe_active_version(peer).await {
            if info.is_active {
                return true;
            }
        }
    }
    false
}
