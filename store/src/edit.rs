//! Edit state of a store key within one store.
//!
//! The state is never stored. It is derived from which local tables hold an
//! entry for the key (see [`crate::LocalTables::edit_state`]).

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a store holds a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EditState {
    /// No local copy; reads and writes fall through to the parent chain.
    Inherited,
    /// A pinned local reference that is not independently writable.
    Locked,
    /// An independent, writable local copy.
    Editable,
}

impl EditState {
    /// True if the store holds its own entry for the key.
    pub fn has_local_copy(self) -> bool {
        !matches!(self, EditState::Inherited)
    }

    pub fn is_editable(self) -> bool {
        matches!(self, EditState::Editable)
    }
}

impl fmt::Display for EditState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EditState::Inherited => "inherited",
            EditState::Locked => "locked",
            EditState::Editable => "editable",
        };
        f.write_str(name)
    }
}
