//! In-memory epoch-versioned key storage.
//!
//! Grounded on the upstream `InMemorySignatureStore`'s pattern of a single short-held lock
//! guarding an append-only map: here the map is `epoch -> KeyShareVersion` plus an
//! `active_epoch` pointer, and every mutation is a brief, in-place map update rather than
//! a full-store rewrite.

use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::keyshare::KeyShareVersion;

/// The node's local view of every key-share version it has ever held, plus which one is
/// currently active. `BTreeMap` keeps lookups ordered by epoch, which `get_at_time` relies
/// on.
#[derive(Default)]
pub struct KeyStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    versions: BTreeMap<i64, KeyShareVersion>,
    active_epoch: Option<i64>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a key-share version. Idempotent: re-adding the same epoch is a no-op rather
    /// than an overwrite, so a retried finalize can't silently replace a persisted share.
    pub fn add(&self, version: KeyShareVersion) {
        let mut inner = self.inner.write();
        inner.versions.entry(version.epoch).or_insert(version);
    }

    /// Promotes `epoch` to active. The caller is responsible for having durably persisted
    /// both the version and the pointer before calling this — see §4.3's "persist before
    /// promoting" finalize rule.
    pub fn set_active(&self, epoch: i64) -> bool {
        let mut inner = self.inner.write();
        if !inner.versions.contains_key(&epoch) {
            return false;
        }
        inner.active_epoch = Some(epoch);
        true
    }

    pub fn get_active(&self) -> Option<KeyShareVersion> {
        let inner = self.inner.read();
        inner.active_epoch.and_then(|e| inner.versions.get(&e).cloned())
    }

    pub fn active_private_share(&self) -> Option<threshold_bls::curve::bls12381::Scalar> {
        self.get_active().map(|v| v.private_share)
    }

    pub fn get(&self, epoch: i64) -> Option<KeyShareVersion> {
        self.inner.read().versions.get(&epoch).cloned()
    }

    /// The version active at time `t`: the entry at the largest epoch boundary `<= t`,
    /// where boundaries are multiples of `frequency`. Returns `None` if `t` precedes every
    /// known epoch.
    pub fn get_at_time(&self, t: i64, frequency: i64) -> Option<KeyShareVersion> {
        let boundary = (t / frequency) * frequency;
        let inner = self.inner.read();
        inner
            .versions
            .range(..=boundary)
            .next_back()
            .map(|(_, v)| v.clone())
    }

    pub fn all_epochs(&self) -> Vec<i64> {
        self.inner.read().versions.keys().copied().collect()
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
            participant_ids: vec![1, 2, 3],
            is_active: false,
        }
    }

    #[test]
    fn add_is_idempotent() {
        let store = KeyStore::new();
        store.add(version(10));
        let mut other = version(10);
        other.participant_ids = vec![9, 9, 9];
        store.add(other);
        assert_eq!(store.get(10).unwrap().participant_ids, vec![1, 2, 3]);
    }

    #[test]
    fn set_active_requires_existing_epoch() {
        let store = KeyStore::new();
        assert!(!store.set_active(5));
        store.add(version(5));
        assert!(store.set_active(5));
        assert_eq!(store.get_active().unwrap().epoch, 5);
    }

    #[test]
    fn get_at_time_picks_largest_boundary_not_after_t() {
        let store = KeyStore::new();
        store.add(version(0));
        store.add(version(100));
        store.add(version(200));

        assert_eq!(store.get_at_time(50, 100).unwrap().epoch, 0);
        assert_eq!(store.get_at_time(150, 100).unwrap().epoch, 100);
        assert_eq!(store.get_at_time(250, 100).unwrap().epoch, 200);
        assert!(store.get_at_time(-1, 100).is_none());
    }
}
