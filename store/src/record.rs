//! Record lifecycle on top of the store.
//!
//! These operations pair data and status writes with the matching change
//! tracking, the way a record layer drives the store: loading, creating,
//! editing attributes, destroying and unloading.

use crate::{error::Result, DataHash, Error, Revision, Status, StoreId, StoreKey, StoreTree};
use serde_json::Value;

impl StoreTree {
    /// Load `hash` under a fresh key as clean, ready data.
    pub fn load_record(&mut self, id: StoreId, hash: DataHash) -> StoreKey {
        let key = self.next_store_key();
        self.load_record_at(id, key, hash);
        key
    }

    /// Load `hash` under an existing key, replacing whatever was there.
    pub fn load_record_at(&mut self, id: StoreId, key: StoreKey, hash: DataHash) {
        self.write(id, key, hash, Some(Status::READY_CLEAN));
        self.mark_changed(id, key);
    }

    /// Create a new record under a fresh key.
    pub fn create_record(&mut self, id: StoreId, hash: DataHash) -> StoreKey {
        let key = self.next_store_key();
        self.write(id, key, hash, Some(Status::READY_NEW));
        self.mark_changed(id, key);
        key
    }

    /// Check that `key` can take an edit in `id`.
    fn writable_status(&self, id: StoreId, key: StoreKey) -> Result<Status> {
        if self.lookup(id, key).is_none() {
            return Err(Error::InvalidState(key));
        }
        let status = self.read_status(id, key);
        if status.is_busy() {
            Err(Error::RecordBusy { key, status })
        } else if !status.is_ready() {
            Err(Error::InvalidStatus { key, status })
        } else {
            Ok(status)
        }
    }

    /// Set one attribute of a record.
    ///
    /// Outside a batch the record is marked dirty and changed immediately.
    /// Inside one, the change is settled when the outermost bracket closes,
    /// and every record edited in the bracket shares one revision.
    pub fn write_attribute(
        &mut self,
        id: StoreId,
        key: StoreKey,
        name: impl Into<String>,
        value: Value,
    ) -> Result<()> {
        self.writable_status(id, key)?;
        self.read_editable(id, key).insert(name.into(), value);

        if self.in_batch() {
            self.batch.defer(id, key);
        } else {
            self.settle_record_change(id, key, None);
        }
        Ok(())
    }

    /// Mark a record edited outside [`StoreTree::write_attribute`] as dirty
    /// and changed.
    pub fn record_did_change(&mut self, id: StoreId, key: StoreKey) -> Result<()> {
        self.writable_status(id, key)?;
        self.settle_record_change(id, key, None);
        Ok(())
    }

    pub(crate) fn settle_record_change(&mut self, id: StoreId, key: StoreKey, revision: Option<Revision>) {
        if self.read_status(id, key) == Status::READY_CLEAN {
            self.write_status(id, key, Status::READY_DIRTY);
        }
        self.did_change(id, &[key], revision, false);
    }

    /// Mark a record destroyed. Records that were never committed become
    /// clean, others dirty. Destroying twice is a no-op.
    pub fn destroy_record(&mut self, id: StoreId, key: StoreKey) -> Result<()> {
        let status = self.read_status(id, key);
        let next = if status.is_destroyed() || status == Status::BUSY_DESTROYING {
            return Ok(());
        } else if status == Status::EMPTY {
            return Err(Error::InvalidStatus { key, status });
        } else if status.is_busy() {
            return Err(Error::RecordBusy { key, status });
        } else if status == Status::READY_NEW {
            Status::DESTROYED_CLEAN
        } else {
            Status::DESTROYED_DIRTY
        };

        self.write_status(id, key, next);
        self.mark_status_changed(id, key);
        Ok(())
    }

    /// Drop the data of a record and return it to empty.
    pub fn unload_record(&mut self, id: StoreId, key: StoreKey) {
        self.remove_data_hash(id, key, Some(Status::EMPTY));
        self.mark_status_changed(id, key);
    }
}
