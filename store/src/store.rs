//! StoreTree - the arena of root and chained stores.
//!
//! Stores are addressed by [`StoreId`] handles into one arena. Each chained
//! store records its parent and each store lists its children, so the tree
//! can be walked in both directions without shared ownership.
//!
//! Reads walk the parent chain and stop at the first store holding a local
//! entry. Writes always land in the store they target, after pinning a lock
//! that remembers which revision of the parent the edit was based on.

use crate::{
    config::StoreConfig,
    notify::{Batch, Observers},
    DataHash, EditState, KeyAllocator, LocalTables, Revision, Status, StoreKey, UNREVISED,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::iter;
use std::sync::Arc;

/// Handle to one store within a [`StoreTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(u64);

impl StoreId {
    pub const fn from_raw(raw: u64) -> Self {
        StoreId(raw)
    }

    pub const fn as_raw(self) -> u64 {
        self.0
    }

    /// Position in the arena, or None if the handle cannot address one
    /// on this target.
    fn index(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One store in the arena.
#[derive(Debug)]
pub(crate) struct StoreNode {
    pub(crate) parent: Option<StoreId>,
    pub(crate) children: Vec<StoreId>,
    pub(crate) lock_on_read: bool,
    pub(crate) tables: LocalTables,
    pub(crate) observers: Observers,
}

impl StoreNode {
    fn new(parent: Option<StoreId>, lock_on_read: bool) -> Self {
        Self {
            parent,
            children: Vec::new(),
            lock_on_read,
            tables: LocalTables::new(),
            observers: Observers::default(),
        }
    }
}

/// A root store and every store chained from it.
///
/// Store handles stay valid until [`StoreTree::destroy`] removes them.
/// Passing a handle that was never issued by this tree, or one that has been
/// destroyed, panics; use [`StoreTree::contains`] when a handle comes from
/// outside.
#[derive(Debug)]
pub struct StoreTree {
    config: StoreConfig,
    keys: Arc<KeyAllocator>,
    /// Last revision handed out by [`StoreTree::next_revision`]
    revision_counter: Revision,
    nodes: Vec<Option<StoreNode>>,
    pub(crate) batch: Batch,
    pub(crate) next_observer: u64,
}

impl Default for StoreTree {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreTree {
    /// Create a tree with the default configuration.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Create a tree drawing store keys from the process-wide allocator.
    pub fn with_config(config: StoreConfig) -> Self {
        Self::with_allocator(config, KeyAllocator::global())
    }

    /// Create a tree drawing store keys from `keys`.
    pub fn with_allocator(config: StoreConfig, keys: Arc<KeyAllocator>) -> Self {
        let root = StoreNode::new(None, config.lock_on_read);
        Self {
            config,
            keys,
            revision_counter: UNREVISED,
            nodes: vec![Some(root)],
            batch: Batch::default(),
            next_observer: 0,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The root store.
    pub fn root(&self) -> StoreId {
        StoreId(0)
    }

    /// Check whether `id` names a live store.
    pub fn contains(&self, id: StoreId) -> bool {
        matches!(id.index().and_then(|i| self.nodes.get(i)), Some(Some(_)))
    }

    /// Number of live stores, the root included.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_some()).count()
    }

    /// A tree always holds its root.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Allocate a fresh store key.
    pub fn next_store_key(&self) -> StoreKey {
        self.keys.next_key()
    }

    /// Allocate a fresh revision, greater than every revision handed out
    /// before by this tree.
    pub fn next_revision(&mut self) -> Revision {
        self.revision_counter += 1;
        self.revision_counter
    }

    pub(crate) fn node(&self, id: StoreId) -> &StoreNode {
        match id.index().and_then(|i| self.nodes.get(i)) {
            Some(Some(node)) => node,
            _ => panic!("store {} does not exist in this tree", id),
        }
    }

    pub(crate) fn node_mut(&mut self, id: StoreId) -> &mut StoreNode {
        match id.index().and_then(|i| self.nodes.get_mut(i)) {
            Some(Some(node)) => node,
            _ => panic!("store {} does not exist in this tree", id),
        }
    }

    /// `id` followed by each of its ancestors up to the root.
    pub fn ancestry(&self, id: StoreId) -> impl Iterator<Item = StoreId> + '_ {
        iter::successors(Some(id), move |current| self.node(*current).parent)
    }

    pub fn parent(&self, id: StoreId) -> Option<StoreId> {
        self.node(id).parent
    }

    pub fn children(&self, id: StoreId) -> &[StoreId] {
        &self.node(id).children
    }

    pub fn is_root(&self, id: StoreId) -> bool {
        self.node(id).parent.is_none()
    }

    /// Read-only view of a store's local tables.
    pub fn tables(&self, id: StoreId) -> &LocalTables {
        &self.node(id).tables
    }

    pub fn lock_on_read(&self, id: StoreId) -> bool {
        self.node(id).lock_on_read
    }

    /// Override lock-on-read for one store.
    pub fn set_lock_on_read(&mut self, id: StoreId, enabled: bool) {
        self.node_mut(id).lock_on_read = enabled;
    }

    // =========================================================================
    // Chaining
    // =========================================================================

    /// Create a store whose parent is `parent`. The new store starts with
    /// every key inherited.
    pub fn chain(&mut self, parent: StoreId) -> StoreId {
        let lock_on_read = self.node(parent).lock_on_read;
        let id = StoreId(self.nodes.len() as u64);
        self.nodes.push(Some(StoreNode::new(Some(parent), lock_on_read)));
        self.node_mut(parent).children.push(id);

        tracing::debug!(store = %id, parent = %parent, "chained store");
        id
    }

    /// Remove a chained store and every store chained beneath it. Pending
    /// changes in the removed stores are dropped.
    pub fn destroy(&mut self, id: StoreId) -> crate::error::Result<()> {
        let parent = self.node(id).parent.ok_or(crate::Error::RootStore(id))?;
        self.node_mut(parent).children.retain(|child| *child != id);

        let mut removed = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let slot = next.index().and_then(|i| self.nodes.get_mut(i));
            if let Some(node) = slot.and_then(Option::take) {
                stack.extend(node.children);
                removed.insert(next);
            }
        }
        self.batch.forget_stores(&removed);

        tracing::debug!(store = %id, removed = removed.len(), "destroyed store");
        Ok(())
    }

    // =========================================================================
    // Chain lookups
    // =========================================================================

    /// Edit state of `key` in store `id`.
    pub fn edit_state(&self, id: StoreId, key: StoreKey) -> EditState {
        let node = self.node(id);
        node.tables.edit_state(key, node.parent.is_none())
    }

    /// The first value `f` yields walking from `id` toward the root.
    fn find_in_chain<'a, T>(
        &'a self,
        id: StoreId,
        mut f: impl FnMut(&'a LocalTables) -> Option<T>,
    ) -> Option<T> {
        self.ancestry(id).find_map(|store| f(&self.node(store).tables))
    }

    /// The data hash visible from `id`, without locking anything.
    pub(crate) fn lookup(&self, id: StoreId, key: StoreKey) -> Option<&Arc<DataHash>> {
        self.find_in_chain(id, |tables| tables.data_entry(key))
            .and_then(Option::as_ref)
    }

    /// Current revision of `key` as seen from `id`.
    pub fn revision(&self, id: StoreId, key: StoreKey) -> Option<Revision> {
        self.find_in_chain(id, |tables| tables.revision(key))
    }

    /// Lock pinned on `key` in `id` itself.
    pub fn lock(&self, id: StoreId, key: StoreKey) -> Option<Revision> {
        self.node(id).tables.lock(key)
    }

    /// Status of `key` as seen from `id`. Unknown keys are [`Status::EMPTY`].
    pub fn read_status(&self, id: StoreId, key: StoreKey) -> Status {
        self.find_in_chain(id, |tables| tables.status(key))
            .unwrap_or(Status::EMPTY)
    }

    // =========================================================================
    // Locking
    // =========================================================================

    /// Take a local copy of `key` in a chained store, pinning the parent's
    /// current revision as its lock. A store that already holds a lock, and
    /// the root, are left untouched.
    ///
    /// The copy shares the visible hash unless the parent itself holds the
    /// key editable, in which case the hash is cloned and the copy is
    /// editable too. A parent that merely inherits the key passes on a
    /// locked reference, whatever its own ancestors hold.
    pub(crate) fn lock_key(&mut self, id: StoreId, key: StoreKey) {
        self.pin(id, key, true);
    }

    /// Like [`StoreTree::lock_key`], but always shares the ancestor's hash.
    /// Sharing is safe even with an editable ancestor: an edit through
    /// [`LocalTables::editable_hash`] detaches the ancestor's copy first.
    fn lock_key_shared(&mut self, id: StoreId, key: StoreKey) {
        self.pin(id, key, false);
    }

    fn pin(&mut self, id: StoreId, key: StoreKey, clone_editable: bool) {
        let node = self.node(id);
        let Some(parent) = node.parent else { return };
        if node.tables.lock(key).is_some() {
            return;
        }

        let parent_editable =
            clone_editable && self.edit_state(parent, key) == EditState::Editable;
        let entry = self.lookup(parent, key).cloned();
        let status = self.find_in_chain(parent, |tables| tables.status(key));
        let revision = self.revision(parent, key);
        let lock = revision.unwrap_or(UNREVISED);

        let tables = &mut self.node_mut(id).tables;
        match entry {
            Some(hash) if parent_editable => {
                tables.set_data_entry(key, Some(Arc::new(DataHash::clone(&hash))));
                tables.mark_editable(key);
            }
            entry => tables.set_data_entry(key, entry),
        }
        if let Some(status) = status {
            tables.set_status(key, status);
        }
        if let Some(revision) = revision {
            tables.set_revision(key, revision);
        }
        tables.pin_lock(key, lock);

        tracing::trace!(store = %id, key, lock, "pinned lock");
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Read the data hash for `key` as seen from `id`.
    ///
    /// With lock-on-read enabled, the first read of an inherited key that
    /// yields data pins it in `id`, so later changes in the parent stay
    /// invisible until the store is discarded or committed.
    pub fn read(&mut self, id: StoreId, key: StoreKey) -> Option<&DataHash> {
        let node = self.node(id);
        if node.lock_on_read
            && node.tables.edit_state(key, node.parent.is_none()) == EditState::Inherited
            && self.lookup(id, key).is_some()
        {
            self.lock_key_shared(id, key);
        }
        self.lookup(id, key).map(|hash| &**hash)
    }

    /// Read without pinning anything, whatever the lock-on-read setting.
    pub fn peek(&self, id: StoreId, key: StoreKey) -> Option<&DataHash> {
        self.lookup(id, key).map(|hash| &**hash)
    }

    /// An independent, writable copy of `key` in store `id`.
    ///
    /// The first call clones whatever is visible (or starts from an empty
    /// hash) and marks the key editable. Later calls return the same copy.
    pub fn read_editable(&mut self, id: StoreId, key: StoreKey) -> &mut DataHash {
        if !self.node(id).tables.is_editable(key) {
            self.lock_key(id, key);
            if !self.node(id).tables.is_editable(key) {
                let copy = self.lookup(id, key).map(|hash| DataHash::clone(hash));
                let tables = &mut self.node_mut(id).tables;
                tables.set_data_entry(key, Some(Arc::new(copy.unwrap_or_default())));
                tables.mark_editable(key);
            }
        }
        self.node_mut(id).tables.editable_hash(key)
    }

    // =========================================================================
    // Writing
    // =========================================================================

    /// Replace the data hash of `key` in `id`, optionally setting its status.
    /// The key becomes editable in `id`. Nothing is recorded as changed until
    /// [`StoreTree::mark_changed`].
    pub fn write(&mut self, id: StoreId, key: StoreKey, hash: DataHash, status: Option<Status>) {
        self.lock_key(id, key);
        let tables = &mut self.node_mut(id).tables;
        tables.set_data_entry(key, Some(Arc::new(hash)));
        if let Some(status) = status {
            tables.set_status(key, status);
        }
        tables.mark_editable(key);
    }

    /// Set the status of `key` in `id` without touching its data.
    pub fn write_status(&mut self, id: StoreId, key: StoreKey, status: Status) {
        self.lock_key(id, key);
        self.node_mut(id).tables.set_status(key, status);
    }

    /// Drop the data hash of `key` in `id`, shadowing any ancestor's copy.
    /// The status defaults to [`Status::EMPTY`].
    pub fn remove_data_hash(&mut self, id: StoreId, key: StoreKey, status: Option<Status>) {
        self.lock_key(id, key);
        let tables = &mut self.node_mut(id).tables;
        tables.set_data_entry(key, None);
        tables.set_status(key, status.unwrap_or(Status::EMPTY));
        tables.clear_editable(key);
    }

    // =========================================================================
    // Change tracking
    // =========================================================================

    /// Record that `key` changed in `id`: bump its revision, add it to the
    /// pending changes and notify observers.
    pub fn mark_changed(&mut self, id: StoreId, key: StoreKey) -> &mut Self {
        self.did_change(id, &[key], None, false);
        self
    }

    /// Like [`StoreTree::mark_changed`] for several keys, stamping all of
    /// them with `revision`. The revision should come from
    /// [`StoreTree::next_revision`].
    pub fn mark_changed_at(&mut self, id: StoreId, keys: &[StoreKey], revision: Revision) -> &mut Self {
        debug_assert!(revision > UNREVISED, "revision override must be allocated");
        self.did_change(id, keys, Some(revision), false);
        self
    }

    /// Record a change to the status of `key` only.
    pub fn mark_status_changed(&mut self, id: StoreId, key: StoreKey) -> &mut Self {
        self.did_change(id, &[key], None, true);
        self
    }

    pub(crate) fn did_change(
        &mut self,
        id: StoreId,
        keys: &[StoreKey],
        revision: Option<Revision>,
        status_only: bool,
    ) {
        if let Some(revision) = revision {
            if revision > self.revision_counter {
                self.revision_counter = revision;
            }
        }

        for &key in keys {
            if self.edit_state(id, key) == EditState::Inherited {
                self.lock_key(id, key);
            }
            let revision = match revision {
                Some(revision) => revision,
                None => self.next_revision(),
            };

            let tables = &mut self.node_mut(id).tables;
            tables.set_revision(key, revision);
            tables.pending_mut().record(key, status_only);

            tracing::trace!(store = %id, key, revision, status_only, "stamped revision");
            self.emit(id, key, status_only);
        }
    }

    /// Every key with pending changes in `id`.
    pub fn chained_changes(&self, id: StoreId) -> &BTreeSet<StoreKey> {
        self.node(id).tables.pending().changed()
    }

    /// Pending keys in `id` whose only change is their status.
    pub fn status_changes(&self, id: StoreId) -> &BTreeSet<StoreKey> {
        self.node(id).tables.pending().status_only()
    }

    pub fn has_changes(&self, id: StoreId) -> bool {
        !self.node(id).tables.pending().is_empty()
    }
}
