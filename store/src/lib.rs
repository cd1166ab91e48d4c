//! # Carry Store
//!
//! A hierarchical, in-memory record store with nested transactional scopes.
//!
//! A [`StoreTree`] holds one root store and any number of *chained* stores
//! derived from it (and from each other). A chained store reads through to
//! its ancestors until it takes a local copy of a record, stages edits in
//! isolation, and later either commits them into its parent or discards
//! them. Commits are validated with optimistic locks so edits made through
//! sibling scopes are never silently overwritten.
//!
//! ## Design Principles
//!
//! - **No IO**: the store has no knowledge of files, network, or platform
//! - **Copy-on-write**: no mutable data crosses a store boundary by reference
//! - **Opaque content**: data hashes are copied and versioned, never interpreted
//! - **Single-threaded**: every operation runs to completion synchronously
//!
//! ## Core Concepts
//!
//! ### Store keys
//!
//! Every logical record is identified by a [`StoreKey`] handed out by a
//! process-wide [`KeyAllocator`]. Keys are never reused.
//!
//! ### Edit states
//!
//! Within one store a key is in exactly one [`EditState`]:
//! - [`EditState::Inherited`] - no local copy, reads fall through to the parent
//! - [`EditState::Locked`] - a local reference pinned at the parent's revision
//! - [`EditState::Editable`] - an independent, writable local copy
//!
//! ### Revisions and locks
//!
//! Each store keeps a [`Revision`] per key, bumped by
//! [`StoreTree::mark_changed`]. When a chained store first takes a local copy
//! it records the parent's revision as a *lock*. Committing compares every
//! lock with the parent's current revision and fails with
//! [`Error::ChainConflict`] when they differ, unless the commit is forced.
//!
//! ## Quick Start
//!
//! ```rust
//! use carry_store::{EditState, Status, StoreTree};
//! use serde_json::json;
//!
//! let mut tree = StoreTree::new();
//! let root = tree.root();
//!
//! // 1. Load a record into the root store
//! let key = tree.load_record(root, json!({"x": 1}).as_object().cloned().unwrap_or_default());
//!
//! // 2. Edit it in a chained store
//! let editor = tree.chain(root);
//! tree.read_editable(editor, key).insert("x".into(), json!(2));
//! tree.mark_changed(editor, key);
//! assert_eq!(tree.edit_state(editor, key), EditState::Editable);
//!
//! // 3. The root is untouched until the editor commits
//! assert_eq!(tree.peek(root, key).and_then(|h| h.get("x")), Some(&json!(1)));
//! tree.commit_changes(editor, false).unwrap();
//! assert_eq!(tree.peek(root, key).and_then(|h| h.get("x")), Some(&json!(2)));
//! assert_eq!(tree.read_status(root, key), Status::READY_CLEAN);
//! ```
//!
//! ## FFI
//!
//! The [`ffi`] module provides C-compatible functions for use from other
//! languages. All data is exchanged as JSON strings.

pub mod commit;
pub mod config;
pub mod edit;
pub mod error;
pub mod ffi;
pub mod key;
pub mod notify;
pub mod record;
pub mod status;
pub mod store;
pub mod tables;

// Re-export main types at crate root
pub use commit::CommitResult;
pub use config::{ConfigError, StoreConfig};
pub use edit::EditState;
pub use error::Error;
pub use key::{next_store_key, KeyAllocator, FIRST_STORE_KEY};
pub use notify::{ChangeEvent, ObserverId};
pub use status::Status;
pub use store::{StoreId, StoreTree};
pub use tables::{LocalTables, PendingChanges};

/// Type aliases for clarity
pub type StoreKey = u64;
pub type Revision = u64;
pub type DataHash = serde_json::Map<String, serde_json::Value>;

/// Revision of a key that holds data but has never been marked changed.
pub const UNREVISED: Revision = 0;
