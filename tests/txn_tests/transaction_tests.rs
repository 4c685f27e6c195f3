//! Tests for Store and Transaction
//!
//! These tests verify:
//! - Object and root operations inside a transaction
//! - Change detection on commit (only modified objects are written)
//! - Abort, restart and drop semantics
//! - First-committer-wins conflict detection
//! - Store lifecycle, caches and typed references

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use trove::txn::{Outcome, TransactionState};
use trove::{Config, Ref, Store, TroveError};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_store() -> (TempDir, Store) {
    let temp_dir = TempDir::new().unwrap();
    let store = Store::open_path(&temp_dir.path().join("store.trove")).unwrap();
    (temp_dir, store)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Account {
    owner: String,
    balance: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Node {
    label: String,
    next: Option<Ref<Node>>,
}

fn account(owner: &str, balance: i64) -> Account {
    Account {
        owner: owner.to_string(),
        balance,
    }
}

// =============================================================================
// Object Tests
// =============================================================================

#[test]
fn test_roots_and_objects_commit_together() {
    let (_temp, store) = setup_temp_store();

    let mut t1 = store.begin().unwrap();
    t1.set_root("x", String::from("alpha")).unwrap();
    let id = t1.new(vec![1u8, 2, 3]).unwrap();
    assert_eq!(t1.commit().unwrap(), 2);

    let mut t2 = store.begin().unwrap();
    assert_eq!(
        t2.get_root::<String>("x").unwrap().map(String::as_str),
        Some("alpha")
    );
    assert_eq!(t2.get::<Vec<u8>>(id).unwrap(), &vec![1u8, 2, 3]);
}

#[test]
fn test_new_object_visible_inside_transaction() {
    let (_temp, store) = setup_temp_store();
    let mut txn = store.begin().unwrap();

    let id = txn.new(account("ada", 10)).unwrap();

    assert!(txn.contains(id).unwrap());
    assert_eq!(txn.get::<Account>(id).unwrap(), &account("ada", 10));
}

#[test]
fn test_get_unknown_object_fails() {
    let (_temp, store) = setup_temp_store();
    let mut txn = store.begin().unwrap();

    assert!(matches!(
        txn.get::<Account>(42),
        Err(TroveError::InvalidObject(_))
    ));
    assert!(!txn.contains(42).unwrap());
}

#[test]
fn test_root_mapping_is_not_an_object() {
    let (_temp, store) = setup_temp_store();
    let mut txn = store.begin().unwrap();

    assert!(matches!(
        txn.get::<String>(trove::txn::ROOTS_ID),
        Err(TroveError::InvalidObject(_))
    ));
    assert!(!txn.contains(trove::txn::ROOTS_ID).unwrap());
}

#[test]
fn test_type_mismatch_on_live_object() {
    let (_temp, store) = setup_temp_store();
    let mut txn = store.begin().unwrap();
    let id = txn.new(String::from("text")).unwrap();

    assert!(matches!(
        txn.get::<u64>(id),
        Err(TroveError::Restore { .. })
    ));
}

#[test]
fn test_modified_objects_are_written() {
    let (_temp, store) = setup_temp_store();

    let mut setup = store.begin().unwrap();
    let a = setup.new(account("ada", 10)).unwrap();
    let b = setup.new(account("bob", 20)).unwrap();
    setup.commit().unwrap();

    let mut txn = store.begin().unwrap();
    txn.get_mut::<Account>(a).unwrap().balance += 5;
    let _ = txn.get::<Account>(b).unwrap();
    assert_eq!(txn.commit().unwrap(), 1);

    let mut check = store.begin().unwrap();
    assert_eq!(check.get::<Account>(a).unwrap().balance, 15);
    assert_eq!(check.get::<Account>(b).unwrap().balance, 20);
}

#[test]
fn test_untouched_commit_writes_nothing() {
    let (_temp, store) = setup_temp_store();

    let mut setup = store.begin().unwrap();
    let id = setup.new(account("ada", 10)).unwrap();
    setup.commit().unwrap();

    let mut txn = store.begin().unwrap();
    let _ = txn.get_mut::<Account>(id).unwrap();
    assert_eq!(txn.commit().unwrap(), 0);
}

#[test]
fn test_read_only_hash_map_is_not_written() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("store.trove");
    {
        let store = Store::open_path(&path).unwrap();
        let scores: HashMap<String, u32> =
            (0..32).map(|i| (format!("player{}", i), i)).collect();
        let mut setup = store.begin().unwrap();
        setup.set_root("scores", scores).unwrap();
        setup.commit().unwrap();
        store.close().unwrap();
    }

    // Decoded maps iterate in a different order than the encoder saw
    let store = Store::open_path(&path).unwrap();
    let mut first = store.begin().unwrap();
    let mut second = store.begin().unwrap();
    let read = |txn: &mut trove::Transaction| {
        txn.get_root::<HashMap<String, u32>>("scores")
            .unwrap()
            .map(|scores| scores.len())
    };
    assert_eq!(read(&mut first), Some(32));
    assert_eq!(read(&mut second), Some(32));

    assert_eq!(first.commit().unwrap(), 0);
    assert_eq!(second.commit().unwrap(), 0);
}

#[test]
fn test_set_replaces_without_loading() {
    let (_temp, store) = setup_temp_store();

    let mut setup = store.begin().unwrap();
    let id = setup.new(account("ada", 10)).unwrap();
    setup.commit().unwrap();

    let mut txn = store.begin().unwrap();
    txn.set(id, account("ada", 99)).unwrap();
    assert_eq!(txn.commit().unwrap(), 1);

    let mut check = store.begin().unwrap();
    assert_eq!(check.get::<Account>(id).unwrap().balance, 99);
}

#[test]
fn test_set_unknown_object_fails() {
    let (_temp, store) = setup_temp_store();
    let mut txn = store.begin().unwrap();

    assert!(matches!(
        txn.set(7, account("nobody", 0)),
        Err(TroveError::InvalidObject(_))
    ));
}

#[test]
fn test_delete_committed_object() {
    let (_temp, store) = setup_temp_store();

    let mut setup = store.begin().unwrap();
    let id = setup.new(account("ada", 10)).unwrap();
    setup.commit().unwrap();

    let mut txn = store.begin().unwrap();
    txn.delete(id).unwrap();
    assert!(!txn.contains(id).unwrap());
    assert!(txn.get::<Account>(id).is_err());
    txn.commit().unwrap();

    let mut check = store.begin().unwrap();
    assert!(!check.contains(id).unwrap());
}

#[test]
fn test_delete_created_object_releases_id() {
    let (_temp, store) = setup_temp_store();
    let objects = store.stats().unwrap().objects;

    let mut txn = store.begin().unwrap();
    let id = txn.new(account("temp", 0)).unwrap();
    txn.delete(id).unwrap();

    assert!(!txn.contains(id).unwrap());
    assert_eq!(store.stats().unwrap().objects, objects);
    assert_eq!(txn.commit().unwrap(), 0);
}

// =============================================================================
// Typed Reference Tests
// =============================================================================

#[test]
fn test_ref_cycle_round_trip() {
    let (_temp, store) = setup_temp_store();

    let mut txn = store.begin().unwrap();
    let first: Ref<Node> = txn
        .new_ref(Node {
            label: "first".to_string(),
            next: None,
        })
        .unwrap();
    let second = txn
        .new_ref(Node {
            label: "second".to_string(),
            next: Some(first),
        })
        .unwrap();
    first.resolve_mut(&mut txn).unwrap().next = Some(second);
    txn.link_root("list", first.id()).unwrap();
    txn.commit().unwrap();

    let mut txn = store.begin().unwrap();
    let head = txn.root_id("list").unwrap().map(Ref::<Node>::new).unwrap();
    let next = head.resolve(&mut txn).unwrap().next.unwrap();
    assert_eq!(next, second);
    assert_eq!(next.resolve(&mut txn).unwrap().label, "second");

    let back = next.resolve(&mut txn).unwrap().next.unwrap();
    assert_eq!(back, head);
    assert_eq!(back.resolve(&mut txn).unwrap().label, "first");
}

// =============================================================================
// Root Tests
// =============================================================================

#[test]
fn test_root_names_include_staged_changes() {
    let (_temp, store) = setup_temp_store();

    let mut setup = store.begin().unwrap();
    setup.set_root("b", 2u32).unwrap();
    setup.set_root("a", 1u32).unwrap();
    setup.commit().unwrap();

    let mut txn = store.begin().unwrap();
    txn.set_root("c", 3u32).unwrap();
    assert!(txn.remove_root("a").unwrap().is_some());

    assert_eq!(txn.root_names().unwrap(), vec!["b", "c"]);
    assert_eq!(txn.root_id("a").unwrap(), None);
    txn.commit().unwrap();

    let roots = store.roots().unwrap();
    assert_eq!(roots.keys().collect::<Vec<_>>(), vec!["b", "c"]);
}

#[test]
fn test_get_root_mut_persists_change() {
    let (_temp, store) = setup_temp_store();

    let mut setup = store.begin().unwrap();
    setup.set_root("bank", account("ada", 1)).unwrap();
    setup.commit().unwrap();

    let mut txn = store.begin().unwrap();
    txn.get_root_mut::<Account>("bank").unwrap().unwrap().balance = 100;
    assert_eq!(txn.commit().unwrap(), 1);

    let mut check = store.begin().unwrap();
    assert_eq!(
        check.get_root::<Account>("bank").unwrap(),
        Some(&account("ada", 100))
    );
}

#[test]
fn test_missing_root_is_none() {
    let (_temp, store) = setup_temp_store();
    let mut txn = store.begin().unwrap();

    assert!(txn.get_root::<String>("nothing").unwrap().is_none());
    assert_eq!(txn.remove_root("nothing").unwrap(), None);
}

#[test]
fn test_link_root_requires_object() {
    let (_temp, store) = setup_temp_store();
    let mut txn = store.begin().unwrap();

    assert!(matches!(
        txn.link_root("dangling", 55),
        Err(TroveError::InvalidObject(_))
    ));
}

// =============================================================================
// Termination Tests
// =============================================================================

#[test]
fn test_abort_discards_changes() {
    let (_temp, store) = setup_temp_store();
    let objects = store.stats().unwrap().objects;

    let mut txn = store.begin().unwrap();
    let id = txn.new(account("ghost", 0)).unwrap();
    txn.set_root("ghost", 1u8).unwrap();
    txn.abort().unwrap();

    assert_eq!(txn.state(), TransactionState::Terminated(Outcome::Aborted));
    assert_eq!(store.stats().unwrap().objects, objects);
    assert!(store.roots().unwrap().is_empty());

    let mut check = store.begin().unwrap();
    assert!(!check.contains(id).unwrap());
}

#[test]
fn test_terminated_transaction_rejects_work() {
    let (_temp, store) = setup_temp_store();
    let mut txn = store.begin().unwrap();
    txn.commit().unwrap();

    assert_eq!(txn.state(), TransactionState::Terminated(Outcome::Committed));
    assert!(matches!(
        txn.new(1u8),
        Err(TroveError::Transaction(_))
    ));
    assert!(txn.commit().is_err());
    assert!(txn.abort().is_err());
}

#[test]
fn test_restart_reactivates() {
    let (_temp, store) = setup_temp_store();
    let mut txn = store.begin().unwrap();
    let id = txn.new(1u32).unwrap();
    txn.commit().unwrap();

    txn.restart().unwrap();
    assert!(txn.is_active());
    *txn.get_mut::<u32>(id).unwrap() = 2;
    assert_eq!(txn.commit().unwrap(), 1);
}

#[test]
fn test_drop_aborts_active_transaction() {
    let (_temp, store) = setup_temp_store();
    let objects = store.stats().unwrap().objects;

    {
        let mut txn = store.begin().unwrap();
        txn.new(account("dropped", 0)).unwrap();
        assert_eq!(store.open_transactions(), 1);
    }

    assert_eq!(store.open_transactions(), 0);
    assert_eq!(store.stats().unwrap().objects, objects);
}

// =============================================================================
// Conflict Tests
// =============================================================================

#[test]
fn test_disjoint_writes_both_commit() {
    let (_temp, store) = setup_temp_store();
    let mut setup = store.begin().unwrap();
    let a = setup.new(account("ada", 0)).unwrap();
    let b = setup.new(account("bob", 0)).unwrap();
    setup.commit().unwrap();

    let mut t1 = store.begin().unwrap();
    let mut t2 = store.begin().unwrap();
    t1.get_mut::<Account>(a).unwrap().balance = 1;
    t2.get_mut::<Account>(b).unwrap().balance = 2;

    assert_eq!(t2.commit().unwrap(), 1);
    assert_eq!(t1.commit().unwrap(), 1);

    let mut check = store.begin().unwrap();
    assert_eq!(check.get::<Account>(a).unwrap().balance, 1);
    assert_eq!(check.get::<Account>(b).unwrap().balance, 2);
}

#[test]
fn test_write_write_conflict() {
    let (_temp, store) = setup_temp_store();
    let mut setup = store.begin().unwrap();
    let id = setup.new(account("ada", 0)).unwrap();
    setup.commit().unwrap();

    let mut t1 = store.begin().unwrap();
    let mut t2 = store.begin().unwrap();
    t1.get_mut::<Account>(id).unwrap().balance = 1;
    t2.get_mut::<Account>(id).unwrap().balance = 2;

    t1.commit().unwrap();
    match t2.commit() {
        Err(TroveError::CommitConflict { ids, roots }) => {
            assert_eq!(ids, vec![id]);
            assert!(roots.is_empty());
        }
        other => panic!("expected CommitConflict, got {:?}", other),
    }
    assert_eq!(t2.state(), TransactionState::Terminated(Outcome::Aborted));

    let mut check = store.begin().unwrap();
    assert_eq!(check.get::<Account>(id).unwrap().balance, 1);
}

#[test]
fn test_read_write_conflict() {
    let (_temp, store) = setup_temp_store();
    let mut setup = store.begin().unwrap();
    let source = setup.new(account("ada", 10)).unwrap();
    let target = setup.new(account("bob", 0)).unwrap();
    setup.commit().unwrap();

    let mut reader = store.begin().unwrap();
    let seen = reader.get::<Account>(source).unwrap().balance;
    reader.get_mut::<Account>(target).unwrap().balance = seen;

    let mut writer = store.begin().unwrap();
    writer.get_mut::<Account>(source).unwrap().balance = 0;
    writer.commit().unwrap();

    let err = reader.commit().unwrap_err();
    assert!(err.is_conflict());

    let mut check = store.begin().unwrap();
    assert_eq!(check.get::<Account>(target).unwrap().balance, 0);
}

#[test]
fn test_root_conflict() {
    let (_temp, store) = setup_temp_store();
    let mut t1 = store.begin().unwrap();
    let mut t2 = store.begin().unwrap();

    t1.set_root("config", 1u32).unwrap();
    t2.set_root("config", 2u32).unwrap();
    t1.commit().unwrap();

    match t2.commit() {
        Err(TroveError::CommitConflict { ids, roots }) => {
            assert!(ids.is_empty());
            assert_eq!(roots, vec!["config".to_string()]);
        }
        other => panic!("expected CommitConflict, got {:?}", other),
    }

    let mut check = store.begin().unwrap();
    assert_eq!(check.get_root::<u32>("config").unwrap(), Some(&1));
}

#[test]
fn test_distinct_roots_do_not_conflict() {
    let (_temp, store) = setup_temp_store();
    let mut t1 = store.begin().unwrap();
    let mut t2 = store.begin().unwrap();

    t1.set_root("left", 1u32).unwrap();
    t2.set_root("right", 2u32).unwrap();
    t1.commit().unwrap();
    t2.commit().unwrap();

    let roots = store.roots().unwrap();
    assert_eq!(roots.len(), 2);
}

#[test]
fn test_retry_after_conflict() {
    let (_temp, store) = setup_temp_store();
    let mut setup = store.begin().unwrap();
    let id = setup.new(0u64).unwrap();
    setup.commit().unwrap();

    let mut t1 = store.begin().unwrap();
    let mut t2 = store.begin().unwrap();
    *t1.get_mut::<u64>(id).unwrap() += 1;
    *t2.get_mut::<u64>(id).unwrap() += 1;
    t1.commit().unwrap();
    assert!(t2.commit().unwrap_err().is_conflict());

    t2.restart().unwrap();
    *t2.get_mut::<u64>(id).unwrap() += 1;
    assert_eq!(t2.commit().unwrap(), 1);

    let mut check = store.begin().unwrap();
    assert_eq!(check.get::<u64>(id).unwrap(), &2);
}

#[test]
fn test_observed_counts_foreign_commits() {
    let (_temp, store) = setup_temp_store();
    let watcher = store.begin().unwrap();

    let mut t1 = store.begin().unwrap();
    t1.new(1u8).unwrap();
    t1.commit().unwrap();

    let observed = watcher.observed();
    assert_eq!(observed.commits, 1);
    assert_eq!(observed.written, 1);
}

// =============================================================================
// Store Lifecycle Tests
// =============================================================================

#[test]
fn test_fresh_store_has_empty_roots() {
    let (_temp, store) = setup_temp_store();

    assert!(store.is_open());
    assert!(store.roots().unwrap().is_empty());
    assert_eq!(store.stats().unwrap().objects, 1);
    assert!(store.check_integrity().unwrap());
}

#[test]
fn test_open_twice_fails() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("store.trove");
    let store = Store::open_path(&path).unwrap();

    assert!(matches!(
        Store::open_path(&path),
        Err(TroveError::AlreadyInitialized(_))
    ));

    store.close().unwrap();
    let reopened = Store::open_path(&path).unwrap();
    assert!(reopened.is_open());
}

#[test]
fn test_closed_store_rejects_work() {
    let (_temp, store) = setup_temp_store();
    let mut txn = store.begin().unwrap();

    store.close().unwrap();

    assert!(!store.is_open());
    assert!(matches!(store.begin(), Err(TroveError::NotInitialized)));
    assert!(matches!(store.close(), Err(TroveError::NotInitialized)));
    assert!(matches!(txn.new(1u8), Err(TroveError::NotInitialized)));
}

#[test]
fn test_persistence_across_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("store.trove");

    let id = {
        let store = Store::open_path(&path).unwrap();
        let mut txn = store.begin().unwrap();
        let id = txn.set_root("bank", account("ada", 42)).unwrap();
        txn.commit().unwrap();
        store.close().unwrap();
        id
    };

    let store = Store::open(Config::builder().path(&path).build()).unwrap();
    let mut txn = store.begin().unwrap();
    assert_eq!(txn.root_id("bank").unwrap(), Some(id));
    assert_eq!(
        txn.get_root::<Account>("bank").unwrap(),
        Some(&account("ada", 42))
    );
}

// =============================================================================
// Cache Tests
// =============================================================================

#[test]
fn test_commit_populates_caches() {
    let (_temp, store) = setup_temp_store();
    assert_eq!(store.cache_sizes(), (0, 0));

    let mut txn = store.begin().unwrap();
    txn.new(account("ada", 1)).unwrap();
    txn.new(account("bob", 2)).unwrap();
    txn.commit().unwrap();

    assert_eq!(store.cache_sizes(), (2, 2));
}

#[test]
fn test_sweep_evicts_and_reload_works() {
    let (_temp, store) = setup_temp_store();
    let mut txn = store.begin().unwrap();
    let id = txn.new(account("ada", 1)).unwrap();
    txn.commit().unwrap();

    assert_eq!(store.sweep_caches(Duration::from_secs(3600)), (0, 0));
    assert_eq!(store.sweep_caches(Duration::ZERO), (1, 1));
    assert_eq!(store.cache_sizes(), (0, 0));

    let mut txn = store.begin().unwrap();
    assert_eq!(txn.get::<Account>(id).unwrap(), &account("ada", 1));
    assert_eq!(store.cache_sizes(), (1, 1));
}
