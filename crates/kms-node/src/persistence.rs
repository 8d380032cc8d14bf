//! The `Persistence` trait (§6) and its `sled`-backed implementation.
//!
//! Grounded on `ghettobox-vault`'s use of a single `sled::Db` opened once at startup under a
//! data directory, with one record per logical key serialized via `serde_json`/`bincode` — the
//! same "embedded, zero-config" store this node needs and nothing more (§7's non-goal: no
//! durable storage beyond a key/value persistence interface).

use async_trait::async_trait;
use kms_core::error::PersistenceError;
use kms_core::keyshare::KeyShareVersion;
use kms_core::session::ProtocolSession;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Node-wide state that survives a restart independent of any single key-share version:
/// the scheduler's last acted-on block boundary (§4.5).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeState {
    pub last_processed_boundary: Option<u64>,
}

/// The eight persistence operations named in §6. `kms-core` depends only on this trait (via
/// `kms-node` wiring), never on `sled` directly, keeping the storage backend swappable.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn save_node_state(&self, state: &NodeState) -> Result<(), PersistenceError>;
    async fn load_node_state(&self) -> Result<NodeState, PersistenceError>;

    async fn save_key_share_version(&self, version: &KeyShareVersion) -> Result<(), PersistenceError>;
    async fn list_key_share_versions(&self) -> Result<Vec<KeyShareVersion>, PersistenceError>;
    async fn set_active_version_epoch(&self, epoch: i64) -> Result<(), PersistenceError>;
    async fn get_active_version_epoch(&self) -> Result<Option<i64>, PersistenceError>;

    async fn save_protocol_session(&self, session: &ProtocolSession) -> Result<(), PersistenceError>;
    async fn list_protocol_sessions(&self) -> Result<Vec<ProtocolSession>, PersistenceError>;
    async fn delete_protocol_session(&self, session_timestamp: i64) -> Result<(), PersistenceError>;
}

const NODE_STATE_TREE: &str = "node_state";
const NODE_STATE_KEY: &str = "singleton";
const KEY_SHARE_TREE: &str = "key_share_versions";
const ACTIVE_EPOCH_TREE: &str = "active_epoch";
const ACTIVE_EPOCH_KEY: &str = "singleton";
const SESSION_TREE: &str = "protocol_sessions";

/// A `sled`-backed [`Persistence`] implementation: one tree per logical collection, one
/// record per key, `bincode`-serialized. `sled::Db` is internally clonable/thread-safe, so
/// this wraps it directly rather than adding our own lock.
pub struct SledPersistence {
    db: sled::Db,
}

impl SledPersistence {
    pub fn open(path: &str) -> Result<Arc<Self>, PersistenceError> {
        let db = sled::open(path).map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Ok(Arc::new(Self { db }))
    }

    fn tree(&self, name: &str) -> Result<sled::Tree, PersistenceError> {
        self.db.open_tree(name).map_err(|e| PersistenceError::Backend(e.to_string()))
    }
}

#[async_trait]
impl Persistence for SledPersistence {
    async fn save_node_state(&self, state: &NodeState) -> Result<(), PersistenceError> {
        let tree = self.tree(NODE_STATE_TREE)?;
        let bytes = bincode::serialize(state)?;
        tree.insert(NODE_STATE_KEY, bytes).map_err(|e| PersistenceError::Backend(e.to_string()))?;
        tree.flush().map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn load_node_state(&self) -> Result<NodeState, PersistenceError> {
        let tree = self.tree(NODE_STATE_TREE)?;
        match tree.get(NODE_STATE_KEY).map_err(|e| PersistenceError::Backend(e.to_string()))? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(NodeState::default()),
        }
    }

    async fn save_key_share_version(&self, version: &KeyShareVersion) -> Result<(), PersistenceError> {
        let tree = self.tree(KEY_SHARE_TREE)?;
        let bytes = bincode::serialize(version)?;
        tree.insert(version.epoch.to_be_bytes(), bytes)
            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        tree.flush().map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn list_key_share_versions(&self) -> Result<Vec<KeyShareVersion>, PersistenceError> {
        let tree = self.tree(KEY_SHARE_TREE)?;
        tree.iter()
            .values()
            .map(|v| {
                let bytes = v.map_err(|e| PersistenceError::Backend(e.to_string()))?;
                Ok(bincode::deserialize(&bytes)?)
            })
            .collect()
    }

    async fn set_active_version_epoch(&self, epoch: i64) -> Result<(), PersistenceError> {
        let tree = self.tree(ACTIVE_EPOCH_TREE)?;
        tree.insert(ACTIVE_EPOCH_KEY, &epoch.to_be_bytes())
            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        tree.flush().map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get_active_version_epoch(&self) -> Result<Option<i64>, PersistenceError> {
        let tree = self.tree(ACTIVE_EPOCH_TREE)?;
        match tree.get(ACTIVE_EPOCH_KEY).map_err(|e| PersistenceError::Backend(e.to_string()))? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes.as_ref().try_into().map_err(|_| {
                    PersistenceError::Backend("corrupt active epoch record".into())
                })?;
                Ok(Some(i64::from_be_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    async fn save_protocol_session(&self, session: &ProtocolSession) -> Result<(), PersistenceError> {
        let tree = self.tree(SESSION_TREE)?;
        let bytes = bincode::serialize(session)?;
        tree.insert(session.session_timestamp.to_be_bytes(), bytes)
            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        tree.flush().map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn list_protocol_sessions(&self) -> Result<Vec<ProtocolSession>, PersistenceError> {
        let tree = self.tree(SESSION_TREE)?;
        tree.iter()
            .values()
            .map(|v| {
                let bytes = v.map_err(|e| PersistenceError::Backend(e.to_string()))?;
                Ok(bincode::deserialize(&bytes)?)
            })
            .collect()
    }

    async fn delete_protocol_session(&self, session_timestamp: i64) -> Result<(), PersistenceError> {
        let tree = self.tree(SESSION_TREE)?;
        tree.remove(session_timestamp.to_be_bytes())
            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        tree.flush().map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Ok(())
    }
}

/// An in-memory [`Persistence`] used in tests and by `kms-core`'s own integration suite,
/// standing in for disk and avoiding a `sled` dependency there.
#[derive(Default)]
pub struct InMemoryPersistence {
    node_state: parking_lot::Mutex<NodeState>,
    key_shares: parking_lot::Mutex<std::collections::BTreeMap<i64, KeyShareVersion>>,
    active_epoch: parking_lot::Mutex<Option<i64>>,
    sessions: parking_lot::Mutex<std::collections::BTreeMap<i64, ProtocolSession>>,
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn save_node_state(&self, state: &NodeState) -> Result<(), PersistenceError> {
        *self.node_state.lock() = state.clone();
        Ok(())
    }

    async fn load_node_state(&self) -> Result<NodeState, PersistenceError> {
        Ok(self.node_state.lock().clone())
    }

    async fn save_key_share_version(&self, version: &KeyShareVersion) -> Result<(), PersistenceError> {
        self.key_shares.lock().insert(version.epoch, version.clone());
        Ok(())
    }

    async fn list_key_share_versions(&self) -> Result<Vec<KeyShareVersion>, PersistenceError> {
        Ok(self.key_shares.lock().values().cloned().collect())
    }

    async fn set_active_version_epoch(&self, epoch: i64) -> Result<(), PersistenceError> {
        *self.active_epoch.lock() = Some(epoch);
        Ok(())
    }

    async fn get_active_version_epoch(&self) -> Result<Option<i64>, PersistenceError> {
        Ok(*self.active_epoch.lock())
    }

    async fn save_protocol_session(&self, session: &ProtocolSession) -> Result<(), PersistenceError> {
        self.sessions.lock().insert(session.session_timestamp, session.clone());
        Ok(())
    }

    async fn list_protocol_sessions(&self) -> Result<Vec<ProtocolSession>, PersistenceError> {
        Ok(self.sessions.lock().values().cloned().collect())
    }

    async fn delete_protocol_session(&self, session_timestamp: i64) -> Result<(), PersistenceError> {
        self.sessions.lock().remove(&session_timestamp);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use threshold_bls::curve::bls12381::{Scalar, G2};
    use threshold_bls::group::Element;

    fn version(epoch: i64) -> KeyShareVersion {
        KeyShareVersion {
            epoch,
            private_share: Scalar::new(),
            commitments: vec![G2::new()],
            participant_ids: vec![1, 2],
            is_active: false,
        }
    }

    #[tokio::test]
    async fn in_memory_round_trips_key_share_versions() {
        let persistence = InMemoryPersistence::default();
        persistence.save_key_share_version(&version(10)).await.unwrap();
        persistence.set_active_version_epoch(10).await.unwrap();

        let versions = persistence.list_key_share_versions().await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(persistence.get_active_version_epoch().await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn sled_persists_node_state_across_handles() {
        let dir = tempdir();
        {
            let persistence = SledPersistence::open(&dir).unwrap();
            persistence
                .save_node_state(&NodeState { last_processed_boundary: Some(500) })
                .await
                .unwrap();
        }
        let persistence = SledPersistence::open(&dir).unwrap();
        let state = persistence.load_node_state().await.unwrap();
        assert_eq!(state.last_processed_boundary, Some(500));
    }

    fn tempdir() -> String {
        let mut path = std::env::temp_dir();
        path.push(format!("kms-node-test-{}", std::process::id()));
        path.push(format!("{:p}", &path));
        std::fs::create_dir_all(&path).unwrap();
        path.to_str().unwrap().to_string()
    }
}
