//! Per-store local tables.
//!
//! Every store owns one [`LocalTables`]: sparse maps keyed by store key that
//! hold only what the store has taken locally. Anything absent falls through
//! to the parent chain.

use crate::{DataHash, EditState, Revision, Status, StoreKey};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Keys with local changes not yet merged into the parent store.
///
/// `changed` holds every pending key. `status_only` is the subset whose only
/// change is a status transition; a later data change promotes the key out
/// of it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingChanges {
    changed: BTreeSet<StoreKey>,
    status_only: BTreeSet<StoreKey>,
}

impl PendingChanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change to `key`.
    pub fn record(&mut self, key: StoreKey, status_only: bool) {
        let first = self.changed.insert(key);
        if !status_only {
            self.status_only.remove(&key);
        } else if first {
            self.status_only.insert(key);
        }
    }

    /// Union `other` into this set. A key stays status-only only if it is
    /// status-only on both sides where present.
    pub fn merge(&mut self, other: &PendingChanges) {
        for &key in &other.changed {
            self.record(key, other.status_only.contains(&key));
        }
    }

    /// Drop `key`, returning whether it was pending.
    pub fn remove(&mut self, key: StoreKey) -> bool {
        self.status_only.remove(&key);
        self.changed.remove(&key)
    }

    pub fn contains(&self, key: StoreKey) -> bool {
        self.changed.contains(&key)
    }

    pub fn is_status_only(&self, key: StoreKey) -> bool {
        self.status_only.contains(&key)
    }

    /// Every pending key.
    pub fn changed(&self) -> &BTreeSet<StoreKey> {
        &self.changed
    }

    /// Pending keys whose only change is their status.
    pub fn status_only(&self) -> &BTreeSet<StoreKey> {
        &self.status_only
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changed.len()
    }

    pub fn clear(&mut self) {
        self.changed.clear();
        self.status_only.clear();
    }
}

/// The local state of one store.
///
/// A data entry of `None` means the store removed the hash locally and
/// shadows whatever its ancestors hold.
#[derive(Debug, Clone, Default)]
pub struct LocalTables {
    data_hashes: HashMap<StoreKey, Option<Arc<DataHash>>>,
    statuses: HashMap<StoreKey, Status>,
    revisions: HashMap<StoreKey, Revision>,
    locks: HashMap<StoreKey, Revision>,
    editables: HashSet<StoreKey>,
    pending: PendingChanges,
}

impl LocalTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Edit state of `key`. A root store has nothing to inherit from, so
    /// every key it does not hold editable reads as locked.
    pub fn edit_state(&self, key: StoreKey, is_root: bool) -> EditState {
        if self.editables.contains(&key) {
            EditState::Editable
        } else if is_root || self.locks.contains_key(&key) || self.data_hashes.contains_key(&key) {
            EditState::Locked
        } else {
            EditState::Inherited
        }
    }

    /// The local data entry for `key`, if the store holds one.
    pub fn data_entry(&self, key: StoreKey) -> Option<&Option<Arc<DataHash>>> {
        self.data_hashes.get(&key)
    }

    pub fn data_hash(&self, key: StoreKey) -> Option<&DataHash> {
        self.data_hashes.get(&key).and_then(|entry| entry.as_deref())
    }

    pub fn set_data_entry(&mut self, key: StoreKey, entry: Option<Arc<DataHash>>) {
        self.data_hashes.insert(key, entry);
    }

    /// A uniquely owned, mutable hash for `key`, created empty when missing.
    /// Clones first if the hash is still shared with another store.
    pub fn editable_hash(&mut self, key: StoreKey) -> &mut DataHash {
        let entry = self.data_hashes.entry(key).or_insert(None);
        Arc::make_mut(entry.get_or_insert_with(Default::default))
    }

    pub fn status(&self, key: StoreKey) -> Option<Status> {
        self.statuses.get(&key).copied()
    }

    pub fn set_status(&mut self, key: StoreKey, status: Status) {
        self.statuses.insert(key, status);
    }

    pub fn revision(&self, key: StoreKey) -> Option<Revision> {
        self.revisions.get(&key).copied()
    }

    /// Set the revision of `key`. Revisions never move backwards.
    pub fn set_revision(&mut self, key: StoreKey, revision: Revision) {
        let slot = self.revisions.entry(key).or_insert(revision);
        *slot = (*slot).max(revision);
    }

    pub fn lock(&self, key: StoreKey) -> Option<Revision> {
        self.locks.get(&key).copied()
    }

    /// Pin a lock on `key` unless one exists. Returns true if pinned now.
    pub fn pin_lock(&mut self, key: StoreKey, revision: Revision) -> bool {
        if self.locks.contains_key(&key) {
            return false;
        }
        self.locks.insert(key, revision);
        true
    }

    pub fn is_editable(&self, key: StoreKey) -> bool {
        self.editables.contains(&key)
    }

    pub fn mark_editable(&mut self, key: StoreKey) {
        self.editables.insert(key);
    }

    pub fn clear_editable(&mut self, key: StoreKey) {
        self.editables.remove(&key);
    }

    pub fn pending(&self) -> &PendingChanges {
        &self.pending
    }

    pub fn pending_mut(&mut self) -> &mut PendingChanges {
        &mut self.pending
    }

    /// Drop every local entry for `key`, returning whether it was pending.
    pub fn forget(&mut self, key: StoreKey) -> bool {
        self.data_hashes.remove(&key);
        self.statuses.remove(&key);
        self.revisions.remove(&key);
        self.locks.remove(&key);
        self.editables.remove(&key);
        self.pending.remove(key)
    }

    /// Drop all local state.
    pub fn clear(&mut self) {
        self.data_hashes.clear();
        self.statuses.clear();
        self.revisions.clear();
        self.locks.clear();
        self.editables.clear();
        self.pending.clear();
    }

    /// Every key the store holds any local entry for.
    pub fn local_keys(&self) -> BTreeSet<StoreKey> {
        self.data_hashes
            .keys()
            .chain(self.statuses.keys())
            .chain(self.revisions.keys())
            .chain(self.locks.keys())
            .chain(self.pending.changed())
            .copied()
            .collect()
    }
}
