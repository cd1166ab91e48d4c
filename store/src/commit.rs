//! Commit and discard of chained stores.
//!
//! A commit moves a child store's local copies into its parent. Every lock
//! the child pinned is checked against the parent's current revision first,
//! so a commit either applies in full or not at all.
//!
//! # Algorithm
//!
//! 1. Settle record edits an open batch still defers for the child
//! 2. For each key, compare the child's lock with the receiver's revision
//! 3. On any mismatch, fail with a chain conflict unless forced
//! 4. Copy data, status and revision of each key into the receiver
//! 5. Merge the child's pending changes into the receiver's
//! 6. Notify observers of the receiver and its inheriting descendants

use crate::{error::Result, Error, Revision, StoreId, StoreKey, StoreTree, UNREVISED};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Outcome of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResult {
    /// Store that received the changes
    pub receiver: StoreId,
    /// Keys copied into the receiver
    pub committed: Vec<StoreKey>,
    /// Keys whose stale lock was overridden by a forced commit
    pub overridden: Vec<StoreKey>,
}

impl StoreTree {
    /// Copy `keys` from `child` into `receiver`.
    ///
    /// Fails with [`Error::ChainConflict`] if `receiver` changed any of the
    /// keys since `child` locked them, leaving both stores untouched. With
    /// `force` the child's values win regardless.
    ///
    /// Record edits of `keys` still deferred by an open batch are settled
    /// first, so they are part of the commit.
    pub fn commit_changes_from_nested_store(
        &mut self,
        receiver: StoreId,
        child: StoreId,
        keys: impl IntoIterator<Item = StoreKey>,
        force: bool,
    ) -> Result<CommitResult> {
        let keys: BTreeSet<StoreKey> = keys.into_iter().collect();
        self.settle_deferred(child, Some(&keys));

        let mut overridden = Vec::new();
        for &key in &keys {
            let Some(lock) = self.lock(child, key) else {
                continue;
            };
            let current = self.revision(receiver, key).unwrap_or(UNREVISED);
            if lock == current {
                continue;
            }
            if !force {
                tracing::warn!(store = %child, receiver = %receiver, key, lock, revision = current, "chain conflict");
                return Err(Error::ChainConflict {
                    store: child,
                    key,
                    lock,
                    revision: current,
                });
            }
            overridden.push(key);
        }
        if !overridden.is_empty() {
            tracing::warn!(
                store = %child,
                receiver = %receiver,
                keys = ?overridden,
                "forced commit overrides stale locks"
            );
        }

        let receiver_is_root = self.is_root(receiver);
        for &key in &keys {
            if !receiver_is_root {
                self.lock_key(receiver, key);
            }

            let entry = self.lookup(child, key).cloned();
            let status = self
                .ancestry(child)
                .find_map(|store| self.tables(store).status(key));
            let revision = self.committed_revision(receiver, child, key);

            let tables = &mut self.node_mut(receiver).tables;
            tables.set_data_entry(key, entry);
            if let Some(status) = status {
                tables.set_status(key, status);
            }
            tables.set_revision(key, revision);
            tables.clear_editable(key);
        }

        let child_pending = self.tables(child).pending().clone();
        self.node_mut(receiver).tables.pending_mut().merge(&child_pending);
        let child_tables = &mut self.node_mut(child).tables;
        for &key in &keys {
            child_tables.pending_mut().remove(key);
        }

        for &key in &keys {
            let status_only = child_pending.is_status_only(key);
            self.emit(receiver, key, status_only);
        }

        tracing::debug!(
            receiver = %receiver,
            child = %child,
            keys = keys.len(),
            force,
            "committed nested changes"
        );
        Ok(CommitResult {
            receiver,
            committed: keys.into_iter().collect(),
            overridden,
        })
    }

    /// The revision `key` takes in `receiver` when committed from `child`.
    /// The child's revision is carried over unless that would move the
    /// receiver backwards, which only a forced commit over a stale lock can
    /// cause; those keys get a fresh revision instead.
    fn committed_revision(&mut self, receiver: StoreId, child: StoreId, key: StoreKey) -> Revision {
        let incoming = self.revision(child, key).unwrap_or(UNREVISED);
        let current = self.revision(receiver, key).unwrap_or(UNREVISED);
        if incoming >= current {
            incoming
        } else {
            self.next_revision()
        }
    }

    /// Commit every pending change in `id` into its parent, then drop the
    /// committed keys from `id` so it inherits them again.
    pub fn commit_changes(&mut self, id: StoreId, force: bool) -> Result<CommitResult> {
        let parent = self.parent(id).ok_or(Error::RootStore(id))?;
        self.settle_deferred(id, None);
        let keys = self.chained_changes(id).clone();
        let result = self.commit_changes_from_nested_store(parent, id, keys, force)?;

        let tables = &mut self.node_mut(id).tables;
        for &key in &result.committed {
            tables.forget(key);
        }
        Ok(result)
    }

    /// Throw away local state in `id`.
    ///
    /// With `keys`, only those keys are reset to inherited. Without, every
    /// local copy, lock and pending change in the store is dropped, along
    /// with record edits an open batch still holds for it.
    pub fn discard_changes(&mut self, id: StoreId, keys: Option<&[StoreKey]>) -> Result<()> {
        if self.is_root(id) {
            return Err(Error::RootStore(id));
        }

        let scope = keys.map(|keys| keys.iter().copied().collect::<BTreeSet<_>>());
        self.batch.take_deferred(id, scope.as_ref());

        let tables = &mut self.node_mut(id).tables;
        let mut dropped = Vec::new();
        match keys {
            Some(keys) => {
                for &key in keys {
                    let status_only = tables.pending().is_status_only(key);
                    if tables.forget(key) {
                        dropped.push((key, status_only));
                    }
                }
            }
            None => {
                let pending = tables.pending();
                dropped.extend(
                    pending
                        .changed()
                        .iter()
                        .map(|&key| (key, pending.is_status_only(key))),
                );
                tables.clear();
            }
        }

        tracing::debug!(store = %id, dropped = dropped.len(), all = keys.is_none(), "discarded changes");
        for (key, status_only) in dropped {
            self.emit(id, key, status_only);
        }
        Ok(())
    }

    /// Clear `keys` from the pending changes of `id` once whoever persists
    /// the root has taken them. No data moves.
    pub fn acknowledge(&mut self, id: StoreId, keys: &[StoreKey]) {
        let pending = self.node_mut(id).tables.pending_mut();
        for &key in keys {
            pending.remove(key);
        }
    }
}
