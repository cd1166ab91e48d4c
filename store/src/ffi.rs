//! FFI layer for embedding the store in other runtimes.
//!
//! This module provides C-compatible functions over a [`StoreTree`].
//! Data hashes, key lists and results cross the boundary as JSON strings;
//! store handles and store keys cross as plain integers.
//!
//! # Memory Management
//!
//! - Strings returned by `carry_*` functions are allocated by Rust
//! - Caller must free them with `carry_string_free`
//! - Tree pointers must be freed with `carry_tree_free`
//!
//! # Error Handling
//!
//! Functions return JSON with either:
//! - `{"ok": <result>}` on success
//! - `{"error": "<message>"}` on failure

use crate::{DataHash, Error, Status, StoreConfig, StoreId, StoreKey, StoreTree};
use std::ffi::{c_char, CStr, CString};
use std::ptr;

/// Envelope around every string result: `{"ok": ..}` or `{"error": ".."}`.
#[derive(serde::Serialize)]
#[serde(rename_all = "lowercase")]
enum Envelope<T> {
    Ok(T),
    Error(String),
}

const NUL_IN_RESPONSE: &str = r#"{"error":"response contained a null byte"}"#;

/// Serialize `result` into an owned C string for the caller to free with
/// `carry_string_free`.
fn respond<T: serde::Serialize>(result: Result<T, String>) -> *mut c_char {
    let envelope = match result {
        Ok(value) => Envelope::Ok(value),
        Err(message) => Envelope::Error(message),
    };
    let json = serde_json::to_string(&envelope)
        .unwrap_or_else(|e| format!(r#"{{"error":"serialization failed: {}"}}"#, e));
    CString::new(json)
        .or_else(|_| CString::new(NUL_IN_RESPONSE))
        .unwrap_or_default()
        .into_raw()
}

/// Parse a JSON argument. `what` names the argument in error messages.
unsafe fn json_arg<T: serde::de::DeserializeOwned>(ptr: *const c_char, what: &str) -> Result<T, String> {
    if ptr.is_null() {
        return Err(format!("missing {}", what));
    }
    let text = CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| format!("{} is not valid UTF-8", what))?;
    serde_json::from_str(text).map_err(|e| format!("parse error in {}: {}", what, e))
}

/// Run `f` against a live tree and store, reporting failures as JSON.
unsafe fn with_store<T: serde::Serialize>(
    tree: *mut StoreTree,
    store: u64,
    f: impl FnOnce(&mut StoreTree, StoreId) -> Result<T, String>,
) -> *mut c_char {
    let tree = match tree.as_mut() {
        Some(t) => t,
        None => return respond::<()>(Err("null tree pointer".into())),
    };

    let id = StoreId::from_raw(store);
    if !tree.contains(id) {
        return respond::<()>(Err(Error::UnknownStore(id).to_string()));
    }

    respond(f(tree, id))
}

unsafe fn parse_keys(keys_json: *const c_char) -> Result<Vec<StoreKey>, String> {
    json_arg(keys_json, "keys")
}

// ============================================================================
// Tree Lifecycle
// ============================================================================

/// Create a new store tree.
///
/// # Arguments
/// - `config_json`: JSON string of StoreConfig, or null for the defaults
///
/// # Returns
/// Pointer to StoreTree, or null if the configuration does not parse.
///
/// # Safety
/// - `config_json` must be a valid null-terminated C string or null
/// - Caller must free the returned pointer with `carry_tree_free`
#[no_mangle]
pub unsafe extern "C" fn carry_tree_new(config_json: *const c_char) -> *mut StoreTree {
    let config = if config_json.is_null() {
        StoreConfig::default()
    } else {
        match json_arg::<StoreConfig>(config_json, "config") {
            Ok(config) => config,
            Err(message) => {
                tracing::warn!(%message, "rejected tree configuration");
                return ptr::null_mut();
            }
        }
    };

    Box::into_raw(Box::new(StoreTree::with_config(config)))
}

/// Free a store tree and every store in it.
///
/// # Safety
/// - `tree` must be a valid pointer from `carry_tree_new`
/// - Must not be called twice on the same pointer
#[no_mangle]
pub unsafe extern "C" fn carry_tree_free(tree: *mut StoreTree) {
    if !tree.is_null() {
        drop(Box::from_raw(tree));
    }
}

/// Free a string allocated by the store.
///
/// # Safety
/// - `s` must be a valid pointer from a `carry_*` function
/// - Must not be called twice on the same pointer
#[no_mangle]
pub unsafe extern "C" fn carry_string_free(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

/// Handle of the root store, or -1 for a null tree.
///
/// # Safety
/// - `tree` must be a valid pointer from `carry_tree_new` or null
#[no_mangle]
pub unsafe extern "C" fn carry_tree_root(tree: *const StoreTree) -> i64 {
    match tree.as_ref() {
        Some(t) => t.root().as_raw() as i64,
        None => -1,
    }
}

/// Chain a new store from `parent`.
///
/// # Returns
/// JSON string: `{"ok": <store>}` or `{"error": "message"}`
///
/// # Safety
/// - `tree` must be a valid pointer from `carry_tree_new` or null
/// - Caller must free the returned string with `carry_string_free`
#[no_mangle]
pub unsafe extern "C" fn carry_tree_chain(tree: *mut StoreTree, parent: u64) -> *mut c_char {
    with_store(tree, parent, |tree, parent| Ok(tree.chain(parent)))
}

/// Destroy a chained store and everything chained beneath it.
///
/// # Safety
/// - `tree` must be a valid pointer from `carry_tree_new` or null
/// - Caller must free the returned string with `carry_string_free`
#[no_mangle]
pub unsafe extern "C" fn carry_tree_destroy(tree: *mut StoreTree, store: u64) -> *mut c_char {
    with_store(tree, store, |tree, id| tree.destroy(id).map_err(|e| e.to_string()))
}

/// Allocate a fresh store key, or -1 for a null tree.
///
/// # Safety
/// - `tree` must be a valid pointer from `carry_tree_new` or null
#[no_mangle]
pub unsafe extern "C" fn carry_tree_next_store_key(tree: *const StoreTree) -> i64 {
    match tree.as_ref() {
        Some(t) => t.next_store_key() as i64,
        None => -1,
    }
}

// ============================================================================
// Data Access
// ============================================================================

/// Read the data hash of `key` as seen from `store`.
///
/// # Returns
/// JSON string: `{"ok": {...}}`, `{"ok": null}` or `{"error": "message"}`
///
/// # Safety
/// - `tree` must be a valid pointer from `carry_tree_new` or null
/// - Caller must free the returned string with `carry_string_free`
#[no_mangle]
pub unsafe extern "C" fn carry_tree_read(tree: *mut StoreTree, store: u64, key: u64) -> *mut c_char {
    with_store(tree, store, |tree, id| Ok(tree.read(id, key).cloned()))
}

/// Write a data hash into `store`.
///
/// # Arguments
/// - `hash_json`: JSON object
/// - `status`: status bits, or a negative value to leave the status alone
///
/// # Safety
/// - `tree` must be a valid pointer from `carry_tree_new` or null
/// - `hash_json` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `carry_string_free`
#[no_mangle]
pub unsafe extern "C" fn carry_tree_write(
    tree: *mut StoreTree,
    store: u64,
    key: u64,
    hash_json: *const c_char,
    status: i32,
) -> *mut c_char {
    let hash: DataHash = match json_arg(hash_json, "data hash") {
        Ok(h) => h,
        Err(e) => return respond::<()>(Err(e)),
    };

    let status = u16::try_from(status).ok().map(Status::from_bits);
    with_store(tree, store, |tree, id| {
        tree.write(id, key, hash, status);
        Ok(())
    })
}

/// Mark keys changed in `store`.
///
/// # Arguments
/// - `keys_json`: JSON array of store keys
///
/// # Safety
/// - `tree` must be a valid pointer from `carry_tree_new` or null
/// - `keys_json` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `carry_string_free`
#[no_mangle]
pub unsafe extern "C" fn carry_tree_mark_changed(
    tree: *mut StoreTree,
    store: u64,
    keys_json: *const c_char,
) -> *mut c_char {
    let keys = match parse_keys(keys_json) {
        Ok(k) => k,
        Err(e) => return respond::<()>(Err(e)),
    };

    with_store(tree, store, |tree, id| {
        for key in keys {
            tree.mark_changed(id, key);
        }
        Ok(())
    })
}

/// Edit state of `key` in `store`.
///
/// # Returns
/// JSON string: `{"ok": "inherited" | "locked" | "editable"}` or `{"error": "message"}`
///
/// # Safety
/// - `tree` must be a valid pointer from `carry_tree_new` or null
/// - Caller must free the returned string with `carry_string_free`
#[no_mangle]
pub unsafe extern "C" fn carry_tree_edit_state(tree: *mut StoreTree, store: u64, key: u64) -> *mut c_char {
    with_store(tree, store, |tree, id| Ok(tree.edit_state(id, key)))
}

/// Status bits of `key` as seen from `store`.
///
/// # Safety
/// - `tree` must be a valid pointer from `carry_tree_new` or null
/// - Caller must free the returned string with `carry_string_free`
#[no_mangle]
pub unsafe extern "C" fn carry_tree_status(tree: *mut StoreTree, store: u64, key: u64) -> *mut c_char {
    with_store(tree, store, |tree, id| Ok(tree.read_status(id, key)))
}

// ============================================================================
// Commit and Discard
// ============================================================================

/// Keys with pending changes in `store`.
///
/// # Returns
/// JSON string: `{"ok": [key, ...]}` or `{"error": "message"}`
///
/// # Safety
/// - `tree` must be a valid pointer from `carry_tree_new` or null
/// - Caller must free the returned string with `carry_string_free`
#[no_mangle]
pub unsafe extern "C" fn carry_tree_chained_changes(tree: *mut StoreTree, store: u64) -> *mut c_char {
    with_store(tree, store, |tree, id| Ok(tree.chained_changes(id).clone()))
}

/// Commit the pending changes of `store` into its parent.
///
/// # Arguments
/// - `force`: 0 to fail on conflicts, non-zero to override stale locks
///
/// # Returns
/// JSON string: `{"ok": CommitResult}` or `{"error": "message"}`
///
/// # Safety
/// - `tree` must be a valid pointer from `carry_tree_new` or null
/// - Caller must free the returned string with `carry_string_free`
#[no_mangle]
pub unsafe extern "C" fn carry_tree_commit(tree: *mut StoreTree, store: u64, force: i32) -> *mut c_char {
    with_store(tree, store, |tree, id| {
        tree.commit_changes(id, force != 0).map_err(|e| e.to_string())
    })
}

/// Discard local changes in `store`.
///
/// # Arguments
/// - `keys_json`: JSON array of store keys, or null to discard everything
///
/// # Safety
/// - `tree` must be a valid pointer from `carry_tree_new` or null
/// - `keys_json` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `carry_string_free`
#[no_mangle]
pub unsafe extern "C" fn carry_tree_discard(
    tree: *mut StoreTree,
    store: u64,
    keys_json: *const c_char,
) -> *mut c_char {
    let keys = if keys_json.is_null() {
        None
    } else {
        match parse_keys(keys_json) {
            Ok(k) => Some(k),
            Err(e) => return respond::<()>(Err(e)),
        }
    };

    with_store(tree, store, |tree, id| {
        tree.discard_changes(id, keys.as_deref())
            .map_err(|e| e.to_string())
    })
}

/// Acknowledge keys as persisted, clearing them from `store`'s pending changes.
///
/// # Safety
/// - `tree` must be a valid pointer from `carry_tree_new` or null
/// - `keys_json` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `carry_string_free`
#[no_mangle]
pub unsafe extern "C" fn carry_tree_acknowledge(
    tree: *mut StoreTree,
    store: u64,
    keys_json: *const c_char,
) -> *mut c_char {
    let keys = match parse_keys(keys_json) {
        Ok(k) => k,
        Err(e) => return respond::<()>(Err(e)),
    };

    with_store(tree, store, |tree, id| {
        tree.acknowledge(id, &keys);
        Ok(())
    })
}

// ============================================================================
// Utility
// ============================================================================

/// Get the store version.
///
/// # Returns
/// Static string pointer (do not free)
#[no_mangle]
pub extern "C" fn carry_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
