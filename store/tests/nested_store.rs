//! Integration tests for chained stores
//!
//! These tests drive a store tree through its public API: reading through
//! the chain, taking local copies, and committing or discarding them.

use carry_store::{
    DataHash, EditState, Error, KeyAllocator, Status, StoreConfig, StoreId, StoreKey, StoreTree,
    UNREVISED,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn hash(value: Value) -> DataHash {
    value.as_object().cloned().unwrap()
}

/// Route store logs to the test output; filter with `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn new_tree() -> StoreTree {
    init_tracing();
    StoreTree::with_allocator(StoreConfig::default(), Arc::new(KeyAllocator::new()))
}

/// Put `value` in the root as clean data that the root no longer holds
/// editable, the way a record looks after a chained store committed it.
fn seed(tree: &mut StoreTree, value: Value) -> StoreKey {
    let root = tree.root();
    let loader = tree.chain(root);
    let key = tree.next_store_key();
    tree.write(loader, key, hash(value), Some(Status::READY_CLEAN));
    tree.mark_changed(loader, key);
    tree.commit_changes(loader, false).unwrap();
    tree.destroy(loader).unwrap();
    tree.acknowledge(root, &[key]);
    key
}

fn ptr(hash: Option<&DataHash>) -> Option<*const DataHash> {
    hash.map(|h| h as *const DataHash)
}

fn field<'a>(tree: &'a StoreTree, store: StoreId, key: StoreKey, name: &str) -> Option<&'a Value> {
    tree.peek(store, key).and_then(|h| h.get(name))
}

// ============================================================================
// Reading Through the Chain
// ============================================================================

#[test]
fn reads_without_lock_on_read_are_stable() {
    let mut tree = StoreTree::with_allocator(
        StoreConfig::new().with_lock_on_read(false),
        Arc::new(KeyAllocator::new()),
    );
    let key = seed(&mut tree, json!({"foo": "bar"}));
    let child = tree.chain(tree.root());

    let first = tree.read(child, key).cloned();
    let second = tree.read(child, key).cloned();

    assert_eq!(first, second);
    assert_eq!(tree.edit_state(child, key), EditState::Inherited);
    assert!(tree.lock(child, key).is_none());
}

#[test]
fn first_read_locks_at_parent_revision() {
    let mut tree = new_tree();
    let root = tree.root();
    let key = seed(&mut tree, json!({"foo": "bar"}));
    let child = tree.chain(root);
    let parent_revision = tree.revision(root, key);

    let child_ptr = ptr(tree.read(child, key));

    assert_eq!(tree.edit_state(child, key), EditState::Locked);
    assert_eq!(child_ptr, ptr(tree.peek(root, key)));
    assert_eq!(tree.lock(child, key), parent_revision);
    assert_eq!(tree.revision(child, key), parent_revision);
}

#[test]
fn locked_store_does_not_see_later_parent_edits() {
    let mut tree = new_tree();
    let root = tree.root();
    let key = seed(&mut tree, json!({"foo": "bar"}));
    let child = tree.chain(root);
    tree.read(child, key);

    tree.write(root, key, hash(json!({"foo": "changed"})), None);
    tree.mark_changed(root, key);

    assert_eq!(field(&tree, child, key, "foo"), Some(&json!("bar")));
    assert_eq!(field(&tree, root, key, "foo"), Some(&json!("changed")));
}

#[test]
fn inherited_store_sees_later_parent_edits() {
    let mut tree = new_tree();
    let root = tree.root();
    let key = seed(&mut tree, json!({"foo": "bar"}));
    let child = tree.chain(root);

    tree.write(root, key, hash(json!({"foo": "changed"})), None);

    assert_eq!(tree.edit_state(child, key), EditState::Inherited);
    assert_eq!(field(&tree, child, key, "foo"), Some(&json!("changed")));
}

#[test]
fn reads_through_several_levels() {
    let mut tree = new_tree();
    let root = tree.root();
    let key = seed(&mut tree, json!({"depth": 0}));
    let middle = tree.chain(root);
    let leaf = tree.chain(middle);

    assert_eq!(ptr(tree.read(leaf, key)), ptr(tree.peek(root, key)));
    assert_eq!(tree.edit_state(leaf, key), EditState::Locked);
    // The intermediate store is not touched by a read below it
    assert_eq!(tree.edit_state(middle, key), EditState::Inherited);
}

#[test]
fn per_store_lock_on_read_override() {
    let mut tree = new_tree();
    let key = seed(&mut tree, json!({}));
    let child = tree.chain(tree.root());
    tree.set_lock_on_read(child, false);
    let grandchild = tree.chain(child);

    assert!(!tree.lock_on_read(grandchild));
    tree.read(grandchild, key);
    assert_eq!(tree.edit_state(grandchild, key), EditState::Inherited);
}

// ============================================================================
// Editable Copies
// ============================================================================

#[test]
fn editable_copy_is_independent() {
    let mut tree = new_tree();
    let root = tree.root();
    let key = seed(&mut tree, json!({"foo": "bar"}));
    let child = tree.chain(root);

    let editable = tree.read_editable(child, key);
    editable.insert("foo".into(), json!("baz"));
    editable.insert("extra".into(), json!([1, 2, 3]));

    assert_eq!(tree.edit_state(child, key), EditState::Editable);
    assert_ne!(ptr(tree.peek(child, key)), ptr(tree.peek(root, key)));
    assert_eq!(field(&tree, root, key, "foo"), Some(&json!("bar")));
    assert!(field(&tree, root, key, "extra").is_none());
}

#[test]
fn locked_reference_to_editable_parent_is_isolated() {
    let mut tree = new_tree();
    let root = tree.root();
    let key = seed(&mut tree, json!({"n": 1}));
    let middle = tree.chain(root);
    tree.read_editable(middle, key).insert("n".into(), json!(2));
    let leaf = tree.chain(middle);

    tree.read(leaf, key);
    assert_eq!(tree.edit_state(leaf, key), EditState::Locked);
    assert_eq!(ptr(tree.peek(leaf, key)), ptr(tree.peek(middle, key)));

    // Editing the parent again detaches it from the leaf's reference
    tree.read_editable(middle, key).insert("n".into(), json!(3));
    assert_eq!(field(&tree, leaf, key, "n"), Some(&json!(2)));
    assert_eq!(field(&tree, middle, key, "n"), Some(&json!(3)));
}

#[test]
fn changing_below_editable_parent_clones() {
    let mut tree = new_tree();
    let root = tree.root();
    let key = seed(&mut tree, json!({"n": 1}));
    let middle = tree.chain(root);
    tree.read_editable(middle, key).insert("n".into(), json!(2));
    let leaf = tree.chain(middle);

    tree.mark_changed(leaf, key);

    assert_eq!(tree.edit_state(leaf, key), EditState::Editable);
    assert_ne!(ptr(tree.peek(leaf, key)), ptr(tree.peek(middle, key)));
    assert_eq!(field(&tree, leaf, key, "n"), Some(&json!(2)));

    tree.read_editable(leaf, key).insert("n".into(), json!(3));
    assert_eq!(field(&tree, middle, key, "n"), Some(&json!(2)));
}

// ============================================================================
// Revisions and Change Tracking
// ============================================================================

#[test]
fn mark_changed_bumps_revision_and_records_change() {
    let mut tree = new_tree();
    let root = tree.root();
    let key = seed(&mut tree, json!({}));
    let child = tree.chain(root);

    let before = tree.revision(child, key).unwrap_or(UNREVISED);
    tree.mark_changed(child, key);

    assert!(tree.revision(child, key).unwrap() > before);
    assert!(tree.has_changes(child));
    assert!(tree.chained_changes(child).contains(&key));
    assert_eq!(tree.edit_state(child, key), EditState::Locked);
}

#[test]
fn unrevised_data_locks_at_zero() {
    let mut tree = new_tree();
    let root = tree.root();
    let key = tree.next_store_key();
    tree.write(root, key, hash(json!({"a": 1})), None);
    let child = tree.chain(root);

    tree.mark_changed(child, key);
    assert_eq!(tree.lock(child, key), Some(UNREVISED));
    tree.commit_changes(child, false).unwrap();
}

#[test]
fn new_records_commit_without_conflict() {
    let mut tree = new_tree();
    let root = tree.root();
    let child = tree.chain(root);
    let key = tree.next_store_key();

    tree.write(child, key, hash(json!({"fresh": true})), Some(Status::READY_NEW));
    tree.mark_changed(child, key);
    tree.commit_changes(child, false).unwrap();

    assert_eq!(tree.read_status(root, key), Status::READY_NEW);
    assert_eq!(field(&tree, root, key, "fresh"), Some(&json!(true)));
}

// ============================================================================
// Commit
// ============================================================================

#[test]
fn scenario_edit_commit_round_trip() {
    let mut tree = new_tree();
    let root = tree.root();
    let key = tree.next_store_key();
    tree.write(root, key, hash(json!({"x": 1})), Some(Status::READY_CLEAN));
    tree.mark_changed(root, key);
    let first = tree.revision(root, key).unwrap();

    let child = tree.chain(root);
    tree.read(child, key);
    assert_eq!(tree.edit_state(child, key), EditState::Locked);
    assert_eq!(tree.lock(child, key), Some(first));

    tree.write(child, key, hash(json!({"x": 2})), None);
    tree.mark_changed(child, key);
    let edited = tree.revision(child, key).unwrap();
    assert!(edited > first);

    tree.commit_changes(child, false).unwrap();

    assert_eq!(field(&tree, root, key, "x"), Some(&json!(2)));
    assert_eq!(tree.revision(root, key), Some(edited));
    assert_eq!(tree.edit_state(child, key), EditState::Inherited);
    assert!(!tree.has_changes(child));
}

#[test]
fn sibling_conflict_fails_unless_forced() {
    let mut tree = new_tree();
    let root = tree.root();
    let key = seed(&mut tree, json!({"owner": "nobody"}));
    let first = tree.chain(root);
    let second = tree.chain(root);

    tree.write(first, key, hash(json!({"owner": "first"})), None);
    tree.mark_changed(first, key);
    tree.write(second, key, hash(json!({"owner": "second"})), None);
    tree.mark_changed(second, key);

    tree.commit_changes(first, false).unwrap();

    let err = tree.commit_changes(second, false).unwrap_err();
    assert!(matches!(err, Error::ChainConflict { store, key: k, .. } if store == second && k == key));
    assert_eq!(field(&tree, root, key, "owner"), Some(&json!("first")));
    assert!(tree.has_changes(second));

    let result = tree.commit_changes(second, true).unwrap();
    assert_eq!(result.overridden, vec![key]);
    assert_eq!(field(&tree, root, key, "owner"), Some(&json!("second")));
}

#[test]
fn commit_into_parent_then_grandparent() {
    let mut tree = new_tree();
    let root = tree.root();
    let key = seed(&mut tree, json!({"v": 0}));
    let middle = tree.chain(root);
    let leaf = tree.chain(middle);

    tree.read_editable(leaf, key).insert("v".into(), json!(1));
    tree.mark_changed(leaf, key);
    tree.commit_changes(leaf, false).unwrap();

    assert_eq!(field(&tree, middle, key, "v"), Some(&json!(1)));
    assert_eq!(field(&tree, root, key, "v"), Some(&json!(0)));
    assert!(tree.chained_changes(middle).contains(&key));

    tree.commit_changes(middle, false).unwrap();
    assert_eq!(field(&tree, root, key, "v"), Some(&json!(1)));
    assert!(tree.chained_changes(root).contains(&key));
}

/// Data, status and change-tracking edits to four seeded keys.
fn edit_leaf(tree: &mut StoreTree, leaf: StoreId, keys: &[StoreKey]) {
    tree.read_editable(leaf, keys[0]).insert("v".into(), json!("edited"));
    tree.mark_changed(leaf, keys[0]);
    tree.remove_data_hash(leaf, keys[1], None);
    tree.mark_changed(leaf, keys[1]);
    tree.write_status(leaf, keys[2], Status::DESTROYED_DIRTY);
    tree.mark_status_changed(leaf, keys[2]);
    tree.read(leaf, keys[3]);
}

#[test]
fn two_step_commit_matches_direct_commit() {
    let mut nested = new_tree();
    let mut direct = new_tree();
    let keys: Vec<_> = (0..4).map(|i| seed(&mut nested, json!({"v": i}))).collect();
    let direct_keys: Vec<_> = (0..4).map(|i| seed(&mut direct, json!({"v": i}))).collect();
    assert_eq!(keys, direct_keys);

    let middle = nested.chain(nested.root());
    let nested_leaf = nested.chain(middle);
    edit_leaf(&mut nested, nested_leaf, &keys);
    nested.commit_changes(nested_leaf, false).unwrap();
    nested.commit_changes(middle, false).unwrap();

    let direct_leaf = direct.chain(direct.root());
    edit_leaf(&mut direct, direct_leaf, &keys);
    direct.commit_changes(direct_leaf, false).unwrap();

    let (nested_root, direct_root) = (nested.root(), direct.root());
    for &key in &keys {
        assert_eq!(nested.peek(nested_root, key), direct.peek(direct_root, key));
        assert_eq!(nested.read_status(nested_root, key), direct.read_status(direct_root, key));
    }
    assert_eq!(nested.chained_changes(nested_root), direct.chained_changes(direct_root));
    assert_eq!(nested.status_changes(nested_root), direct.status_changes(direct_root));
    assert_eq!(nested.read_status(nested_root, keys[2]), Status::DESTROYED_DIRTY);
    assert!(nested.peek(nested_root, keys[1]).is_none());
}

#[test]
fn commit_with_explicit_keys_leaves_others_pending() {
    let mut tree = new_tree();
    let root = tree.root();
    let a = seed(&mut tree, json!({"a": 0}));
    let b = seed(&mut tree, json!({"b": 0}));
    let child = tree.chain(root);

    tree.write(child, a, hash(json!({"a": 1})), None);
    tree.write(child, b, hash(json!({"b": 1})), None);
    tree.mark_changed(child, a).mark_changed(child, b);

    tree.commit_changes_from_nested_store(root, child, [a], false).unwrap();

    assert_eq!(field(&tree, root, a, "a"), Some(&json!(1)));
    assert_eq!(field(&tree, root, b, "b"), Some(&json!(0)));
    assert!(!tree.chained_changes(child).contains(&a));
    assert!(tree.chained_changes(child).contains(&b));
}

#[test]
fn commit_status_only_change() {
    let mut tree = new_tree();
    let root = tree.root();
    let key = seed(&mut tree, json!({"n": 1}));
    let child = tree.chain(root);

    tree.write_status(child, key, Status::BUSY_COMMITTING);
    tree.mark_status_changed(child, key);
    assert!(tree.status_changes(child).contains(&key));

    tree.commit_changes(child, false).unwrap();

    assert_eq!(tree.read_status(root, key), Status::BUSY_COMMITTING);
    assert!(tree.status_changes(root).contains(&key));
    assert_eq!(field(&tree, root, key, "n"), Some(&json!(1)));
}

#[test]
fn commit_removal_shadows_root() {
    let mut tree = new_tree();
    let root = tree.root();
    let key = seed(&mut tree, json!({"n": 1}));
    let child = tree.chain(root);

    tree.remove_data_hash(child, key, None);
    tree.mark_status_changed(child, key);
    tree.commit_changes(child, false).unwrap();

    assert!(tree.peek(root, key).is_none());
    assert_eq!(tree.read_status(root, key), Status::EMPTY);
}

#[test]
fn commit_on_root_is_an_error() {
    let mut tree = new_tree();
    let root = tree.root();
    assert_eq!(tree.commit_changes(root, false), Err(Error::RootStore(root)));
}

// ============================================================================
// Discard
// ============================================================================

#[test]
fn discard_returns_to_parent_view() {
    let mut tree = new_tree();
    let root = tree.root();
    let key = seed(&mut tree, json!({"foo": "bar"}));
    let child = tree.chain(root);

    tree.read_editable(child, key).insert("foo".into(), json!("baz"));
    tree.mark_changed(child, key);
    tree.discard_changes(child, None).unwrap();

    assert_eq!(tree.edit_state(child, key), EditState::Inherited);
    assert_eq!(tree.read(child, key).cloned(), tree.peek(root, key).cloned());
    assert!(!tree.has_changes(child));
}

#[test]
fn discard_then_read_picks_up_new_parent_state() {
    let mut tree = new_tree();
    let root = tree.root();
    let key = seed(&mut tree, json!({"v": 1}));
    let child = tree.chain(root);
    tree.read(child, key);

    tree.write(root, key, hash(json!({"v": 2})), None);
    tree.mark_changed(root, key);
    assert_eq!(field(&tree, child, key, "v"), Some(&json!(1)));

    tree.discard_changes(child, None).unwrap();
    assert_eq!(tree.read(child, key).and_then(|h| h.get("v")), Some(&json!(2)));
    assert_eq!(tree.lock(child, key), tree.revision(root, key));
}

#[test]
fn discard_selected_keys() {
    let mut tree = new_tree();
    let root = tree.root();
    let a = seed(&mut tree, json!({}));
    let b = seed(&mut tree, json!({}));
    let child = tree.chain(root);
    tree.mark_changed(child, a).mark_changed(child, b);

    tree.discard_changes(child, Some(&[a])).unwrap();

    assert_eq!(tree.edit_state(child, a), EditState::Inherited);
    assert_eq!(tree.edit_state(child, b), EditState::Locked);
    assert!(tree.has_changes(child));
}

// ============================================================================
// Store Lifecycle
// ============================================================================

#[test]
fn destroying_a_store_drops_its_subtree() {
    let mut tree = new_tree();
    let root = tree.root();
    let key = seed(&mut tree, json!({"n": 1}));
    let child = tree.chain(root);
    let grandchild = tree.chain(child);
    tree.write(grandchild, key, hash(json!({"n": 2})), None);
    tree.mark_changed(grandchild, key);

    tree.destroy(child).unwrap();

    assert!(!tree.contains(child));
    assert!(!tree.contains(grandchild));
    assert_eq!(field(&tree, root, key, "n"), Some(&json!(1)));
    assert_eq!(tree.destroy(root), Err(Error::RootStore(root)));
}

#[test]
fn trees_share_the_global_key_space() {
    let a = StoreTree::new();
    let b = StoreTree::new();
    let first = a.next_store_key();
    let second = b.next_store_key();
    assert_ne!(first, second);
}
