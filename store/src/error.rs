//! Error types for the Carry store.

use crate::{Revision, Status, StoreId, StoreKey};
use thiserror::Error;

/// All possible errors from the Carry store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Commit errors
    #[error(
        "chain conflict in store {store} on key {key}: locked at revision {lock}, parent is at {revision}"
    )]
    ChainConflict {
        store: StoreId,
        key: StoreKey,
        lock: Revision,
        revision: Revision,
    },

    // Record state errors
    #[error("invalid state: no data hash for key {0}")]
    InvalidState(StoreKey),

    #[error("invalid status {status} for key {key}")]
    InvalidStatus { key: StoreKey, status: Status },

    #[error("record {key} is busy ({status})")]
    RecordBusy { key: StoreKey, status: Status },

    // Store errors
    #[error("store {0} has no parent store")]
    RootStore(StoreId),

    #[error("store not found: {0}")]
    UnknownStore(StoreId),
}

impl Error {
    /// The store key involved in the error, if any.
    pub fn store_key(&self) -> Option<StoreKey> {
        match self {
            Error::ChainConflict { key, .. }
            | Error::InvalidStatus { key, .. }
            | Error::RecordBusy { key, .. } => Some(*key),
            Error::InvalidState(key) => Some(*key),
            Error::RootStore(_) | Error::UnknownStore(_) => None,
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, Error>;
