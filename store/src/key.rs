//! Store key allocation.
//!
//! Store keys are the stable internal identity of a logical record,
//! independent of any application-level primary key. They come from one
//! counter shared by every store in the process, so two records never
//! receive the same key even when they live in unrelated trees.

use crate::StoreKey;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// The first key handed out by a fresh allocator.
pub const FIRST_STORE_KEY: StoreKey = 1;

/// A monotonically increasing store key generator.
///
/// Keys are append-only and never recycled, even after the record they
/// identified has been unloaded.
#[derive(Debug)]
pub struct KeyAllocator {
    next: AtomicU64,
}

impl KeyAllocator {
    /// Create an allocator starting at [`FIRST_STORE_KEY`].
    pub const fn new() -> Self {
        Self::starting_at(FIRST_STORE_KEY)
    }

    /// Create an allocator whose first key is `first`.
    pub const fn starting_at(first: StoreKey) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// The process-wide allocator shared by every tree that does not inject
    /// its own.
    pub fn global() -> Arc<KeyAllocator> {
        static GLOBAL: OnceLock<Arc<KeyAllocator>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(KeyAllocator::new())))
    }

    /// Return a fresh key.
    pub fn next_key(&self) -> StoreKey {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// The key the next call to [`KeyAllocator::next_key`] will return.
    pub fn peek(&self) -> StoreKey {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for KeyAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Allocate a key from the process-wide allocator.
pub fn next_store_key() -> StoreKey {
    KeyAllocator::global().next_key()
}
