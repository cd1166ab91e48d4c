//! Change notification.
//!
//! Observers register per store and receive a [`ChangeEvent`] whenever a key
//! visible from that store changes: either in the store itself, or in an
//! ancestor while the store still inherits the key.
//!
//! Notifications raised inside a batch bracket are held back and coalesced,
//! one event per store and key, until the outermost bracket closes.

use crate::{EditState, Revision, StoreId, StoreKey, StoreTree, UNREVISED};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A change to one key as seen from one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    /// The store the observer is registered on
    pub store: StoreId,
    pub key: StoreKey,
    /// Revision of the key as seen from `store` after the change
    pub revision: Revision,
    /// True if only the status changed
    pub status_only: bool,
}

/// Handle returned by [`StoreTree::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObserverId(u64);

type Observer = Box<dyn FnMut(&ChangeEvent)>;

/// Observers registered on one store.
#[derive(Default)]
pub(crate) struct Observers {
    entries: Vec<(ObserverId, Observer)>,
}

impl Observers {
    fn add(&mut self, id: ObserverId, observer: Observer) {
        self.entries.push((id, observer));
    }

    fn remove(&mut self, id: ObserverId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| *existing != id);
        self.entries.len() != before
    }

    fn notify(&mut self, event: &ChangeEvent) {
        for (_, observer) in &mut self.entries {
            observer(event);
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("count", &self.entries.len())
            .finish()
    }
}

/// Notifications and record changes held back by an open bracket.
#[derive(Debug, Default)]
pub(crate) struct Batch {
    depth: usize,
    queued: BTreeMap<(StoreId, StoreKey), ChangeEvent>,
    deferred: BTreeSet<(StoreId, StoreKey)>,
}

impl Batch {
    pub(crate) fn is_open(&self) -> bool {
        self.depth > 0
    }

    /// Queue an event, merging it with one already queued for the same
    /// store and key.
    fn queue(&mut self, event: ChangeEvent) {
        self.queued
            .entry((event.store, event.key))
            .and_modify(|queued| {
                queued.revision = queued.revision.max(event.revision);
                queued.status_only &= event.status_only;
            })
            .or_insert(event);
    }

    /// Defer a record change until the outermost bracket closes.
    pub(crate) fn defer(&mut self, store: StoreId, key: StoreKey) {
        self.deferred.insert((store, key));
    }

    /// Remove the deferred record changes of `store`, restricted to `keys`
    /// when given, and return their keys.
    pub(crate) fn take_deferred(
        &mut self,
        store: StoreId,
        keys: Option<&BTreeSet<StoreKey>>,
    ) -> Vec<StoreKey> {
        let taken: Vec<StoreKey> = self
            .deferred
            .range((store, StoreKey::MIN)..=(store, StoreKey::MAX))
            .map(|&(_, key)| key)
            .filter(|key| keys.map_or(true, |keys| keys.contains(key)))
            .collect();
        for &key in &taken {
            self.deferred.remove(&(store, key));
        }
        taken
    }

    /// Drop anything queued for stores that no longer exist.
    pub(crate) fn forget_stores(&mut self, stores: &BTreeSet<StoreId>) {
        self.queued.retain(|(store, _), _| !stores.contains(store));
        self.deferred.retain(|(store, _)| !stores.contains(store));
    }
}

impl StoreTree {
    /// Register `observer` on store `id`.
    pub fn observe(&mut self, id: StoreId, observer: impl FnMut(&ChangeEvent) + 'static) -> ObserverId {
        let observer_id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.node_mut(id).observers.add(observer_id, Box::new(observer));
        observer_id
    }

    /// Remove an observer from store `id`. Returns false if it was not
    /// registered there.
    pub fn unobserve(&mut self, id: StoreId, observer: ObserverId) -> bool {
        self.node_mut(id).observers.remove(observer)
    }

    /// True while a batch bracket is open.
    pub fn in_batch(&self) -> bool {
        self.batch.is_open()
    }

    /// Open a batch bracket. Brackets nest.
    pub fn begin_batch(&mut self) {
        self.batch.depth += 1;
    }

    /// Close a batch bracket. Closing the outermost one settles deferred
    /// record changes under one shared revision and delivers every queued
    /// notification.
    pub fn end_batch(&mut self) {
        match self.batch.depth {
            0 => {
                tracing::warn!("end_batch called without an open batch");
                return;
            }
            1 => {}
            _ => {
                self.batch.depth -= 1;
                return;
            }
        }

        let deferred = std::mem::take(&mut self.batch.deferred);
        if !deferred.is_empty() {
            let revision = self.next_revision();
            for (store, key) in deferred {
                if self.contains(store) {
                    self.settle_record_change(store, key, Some(revision));
                }
            }
        }

        self.batch.depth = 0;
        let queued = std::mem::take(&mut self.batch.queued);
        tracing::debug!(events = queued.len(), "delivering batched notifications");
        for event in queued.into_values() {
            self.deliver(&event);
        }
    }

    /// Settle the deferred record changes of `id` now rather than at the
    /// end of the bracket. Restricted to `keys` when given.
    pub(crate) fn settle_deferred(&mut self, id: StoreId, keys: Option<&BTreeSet<StoreKey>>) {
        let deferred = self.batch.take_deferred(id, keys);
        if deferred.is_empty() {
            return;
        }
        let revision = self.next_revision();
        tracing::trace!(store = %id, keys = deferred.len(), revision, "settling deferred changes early");
        for key in deferred {
            self.settle_record_change(id, key, Some(revision));
        }
    }

    /// Run `f` inside a batch bracket.
    pub fn batch<T>(&mut self, f: impl FnOnce(&mut StoreTree) -> T) -> T {
        self.begin_batch();
        let result = f(self);
        self.end_batch();
        result
    }

    /// Announce a change to `key` in `id`, and in every store below it that
    /// still inherits the key.
    pub(crate) fn emit(&mut self, id: StoreId, key: StoreKey, status_only: bool) {
        let revision = self.revision(id, key).unwrap_or(UNREVISED);

        let mut targets = vec![id];
        let mut stack = self.children(id).to_vec();
        while let Some(store) = stack.pop() {
            if self.edit_state(store, key) == EditState::Inherited {
                targets.push(store);
                stack.extend_from_slice(self.children(store));
            }
        }

        for store in targets {
            let event = ChangeEvent {
                store,
                key,
                revision,
                status_only,
            };
            if self.batch.is_open() {
                self.batch.queue(event);
            } else {
                self.deliver(&event);
            }
        }
    }

    fn deliver(&mut self, event: &ChangeEvent) {
        if !self.contains(event.store) {
            return;
        }
        let observers = &mut self.node_mut(event.store).observers;
        if !observers.is_empty() {
            observers.notify(event);
        }
    }
}
