//! Tests for explicit transactions
//!
//! These tests verify:
//! - Multi-operation atomic commit and abort
//! - Read-your-writes inside a write transaction
//! - Shared transactions rejecting writes
//! - fetch_next ordering
//! - foreach traversal: prefixes, filters, early stop, visitor mutation

use std::path::PathBuf;

use skipfile::{Db, OpenOptions, Precondition, SkipError, TxnMode};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_db() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.skipfile");
    (temp_dir, db_path)
}

fn create_db(path: &PathBuf) -> Db {
    Db::open(path, OpenOptions::new().create(true)).unwrap()
}

// =============================================================================
// Commit / Abort Tests
// =============================================================================

#[test]
fn test_multi_store_commit_is_atomic() {
    let (_temp, path) = setup_temp_db();
    let db = create_db(&path);

    let mut txn = db.begin(TxnMode::Exclusive).unwrap();
    txn.store(b"a", Some(b"1"), Precondition::None).unwrap();
    txn.store(b"b", Some(b"2"), Precondition::None).unwrap();
    txn.store(b"c", Some(b"3"), Precondition::None).unwrap();
    txn.commit().unwrap();

    assert_eq!(db.fetch(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(db.fetch(b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(db.fetch(b"c").unwrap(), Some(b"3".to_vec()));
    assert_eq!(db.num_records(), 3);
}

#[test]
fn test_abort_discards_all_writes() {
    let (_temp, path) = setup_temp_db();
    let db = create_db(&path);

    db.store(b"keep", Some(b"original"), Precondition::None).unwrap();
    let size_before = db.size();

    let mut txn = db.begin(TxnMode::Exclusive).unwrap();
    txn.store(b"keep", Some(b"changed"), Precondition::None).unwrap();
    txn.store(b"new", Some(b"value"), Precondition::None).unwrap();
    txn.delete(b"keep").unwrap();
    txn.abort().unwrap();

    assert_eq!(db.fetch(b"keep").unwrap(), Some(b"original".to_vec()));
    assert_eq!(db.fetch(b"new").unwrap(), None);
    // the uncommitted tail was truncated away
    assert_eq!(db.size(), size_before);
    db.check_consistency().unwrap();
}

#[test]
fn test_drop_aborts_active_transaction() {
    let (_temp, path) = setup_temp_db();
    let db = create_db(&path);

    {
        let mut txn = db.begin(TxnMode::Exclusive).unwrap();
        txn.store(b"ghost", Some(b"value"), Precondition::None).unwrap();
        // dropped without commit
    }

    assert_eq!(db.fetch(b"ghost").unwrap(), None);
    db.check_consistency().unwrap();
}

#[test]
fn test_commit_empty_transaction() {
    let (_temp, path) = setup_temp_db();
    let db = create_db(&path);

    let txn = db.begin(TxnMode::Exclusive).unwrap();
    txn.commit().unwrap();

    let txn = db.begin(TxnMode::Shared).unwrap();
    txn.abort().unwrap();
}

// =============================================================================
// Isolation Tests
// =============================================================================

#[test]
fn test_read_your_writes() {
    let (_temp, path) = setup_temp_db();
    let db = create_db(&path);

    db.store(b"key1", Some(b"committed"), Precondition::None).unwrap();

    let mut txn = db.begin(TxnMode::Exclusive).unwrap();
    txn.store(b"key1", Some(b"pending"), Precondition::None).unwrap();
    txn.store(b"key2", Some(b"also-pending"), Precondition::None).unwrap();

    assert_eq!(txn.fetch(b"key1").unwrap(), Some(b"pending".to_vec()));
    assert_eq!(txn.fetch(b"key2").unwrap(), Some(b"also-pending".to_vec()));

    txn.delete(b"key1").unwrap();
    assert_eq!(txn.fetch(b"key1").unwrap(), None);
    txn.commit().unwrap();

    assert_eq!(db.fetch(b"key1").unwrap(), None);
    assert_eq!(db.fetch(b"key2").unwrap(), Some(b"also-pending".to_vec()));
}

#[test]
fn test_preconditions_see_pending_writes() {
    let (_temp, path) = setup_temp_db();
    let db = create_db(&path);

    let mut txn = db.begin(TxnMode::Exclusive).unwrap();
    txn.store(b"key1", Some(b"v1"), Precondition::MustNotExist).unwrap();

    // key1 now exists within the transaction
    let err = txn
        .store(b"key1", Some(b"v2"), Precondition::MustNotExist)
        .unwrap_err();
    assert!(matches!(err, SkipError::Exists));

    txn.delete(b"key1").unwrap();
    let err = txn
        .store(b"key1", Some(b"v3"), Precondition::MustExist)
        .unwrap_err();
    assert!(matches!(err, SkipError::NotFound));
    txn.commit().unwrap();
}

#[test]
fn test_shared_transaction_rejects_writes() {
    let (_temp, path) = setup_temp_db();
    let db = create_db(&path);

    let mut txn = db.begin(TxnMode::Shared).unwrap();
    let err = txn
        .store(b"key1", Some(b"value1"), Precondition::None)
        .unwrap_err();
    assert!(matches!(err, SkipError::ReadOnly));

    let err = txn.delete(b"key1").unwrap_err();
    assert!(matches!(err, SkipError::ReadOnly));
    txn.abort().unwrap();
}

#[test]
fn test_shared_open_rejects_exclusive_begin() {
    let (_temp, path) = setup_temp_db();
    create_db(&path).close().unwrap();

    let db = Db::open(&path, OpenOptions::new().shared(true)).unwrap();
    let err = db.begin(TxnMode::Exclusive).unwrap_err();
    assert!(matches!(err, SkipError::ReadOnly));

    let err = db.store(b"k", Some(b"v"), Precondition::None).unwrap_err();
    assert!(matches!(err, SkipError::ReadOnly));
}

// =============================================================================
// fetch_next Tests
// =============================================================================

#[test]
fn test_fetch_next_walks_in_key_order() {
    let (_temp, path) = setup_temp_db();
    let db = create_db(&path);

    for key in [b"delta" as &[u8], b"alpha", b"charlie", b"bravo"] {
        db.store(key, Some(b"x"), Precondition::None).unwrap();
    }

    let mut seen = Vec::new();
    let mut key = Vec::new();
    while let Some((next, _)) = db.fetch_next(&key).unwrap() {
        seen.push(next.clone());
        key = next;
    }

    assert_eq!(
        seen,
        vec![
            b"alpha".to_vec(),
            b"bravo".to_vec(),
            b"charlie".to_vec(),
            b"delta".to_vec()
        ]
    );
}

#[test]
fn test_fetch_next_is_strictly_greater() {
    let (_temp, path) = setup_temp_db();
    let db = create_db(&path);

    db.store(b"aaa", Some(b"1"), Precondition::None).unwrap();
    db.store(b"bbb", Some(b"2"), Precondition::None).unwrap();

    let (key, _) = db.fetch_next(b"aaa").unwrap().unwrap();
    assert_eq!(key, b"bbb");
    assert_eq!(db.fetch_next(b"bbb").unwrap(), None);
}

#[test]
fn test_fetch_next_skips_tombstones() {
    let (_temp, path) = setup_temp_db();
    let db = create_db(&path);

    db.store(b"a", Some(b"1"), Precondition::None).unwrap();
    db.store(b"b", Some(b"2"), Precondition::None).unwrap();
    db.store(b"c", Some(b"3"), Precondition::None).unwrap();
    db.delete(b"b").unwrap();

    let (key, _) = db.fetch_next(b"a").unwrap().unwrap();
    assert_eq!(key, b"c");
}

// =============================================================================
// foreach Tests
// =============================================================================

#[test]
fn test_foreach_visits_all_in_order() {
    let (_temp, path) = setup_temp_db();
    let db = create_db(&path);

    for i in 0..20u32 {
        let key = format!("key{:02}", i);
        db.store(key.as_bytes(), Some(b"v"), Precondition::None).unwrap();
    }

    let mut seen = Vec::new();
    let count = db
        .foreach(
            b"",
            None,
            |key, _| {
                seen.push(key.to_vec());
                Ok(true)
            },
            false,
        )
        .unwrap();

    assert_eq!(count, 20);
    let mut sorted = seen.clone();
    sorted.sort();
    assert_eq!(seen, sorted);
}

#[test]
fn test_foreach_prefix_bounds() {
    let (_temp, path) = setup_temp_db();
    let db = create_db(&path);

    for key in [b"app/one" as &[u8], b"app/two", b"apz", b"aq", b"zzz"] {
        db.store(key, Some(b"v"), Precondition::None).unwrap();
    }

    let mut seen = Vec::new();
    db.foreach(
        b"app/",
        None,
        |key, _| {
            seen.push(key.to_vec());
            Ok(true)
        },
        false,
    )
    .unwrap();

    assert_eq!(seen, vec![b"app/one".to_vec(), b"app/two".to_vec()]);
}

#[test]
fn test_foreach_filter_runs_before_visit() {
    let (_temp, path) = setup_temp_db();
    let db = create_db(&path);

    db.store(b"a", Some(b"keep"), Precondition::None).unwrap();
    db.store(b"b", Some(b"drop"), Precondition::None).unwrap();
    db.store(b"c", Some(b"keep"), Precondition::None).unwrap();

    let filter = |_k: &[u8], v: &[u8]| v == b"keep";
    let mut seen = Vec::new();
    let count = db
        .foreach(
            b"",
            Some(&filter),
            |key, _| {
                seen.push(key.to_vec());
                Ok(true)
            },
            false,
        )
        .unwrap();

    // filtered-out records are not counted as visited
    assert_eq!(count, 2);
    assert_eq!(seen, vec![b"a".to_vec(), b"c".to_vec()]);
}

#[test]
fn test_foreach_early_stop() {
    let (_temp, path) = setup_temp_db();
    let db = create_db(&path);

    for key in [b"a" as &[u8], b"b", b"c", b"d"] {
        db.store(key, Some(b"v"), Precondition::None).unwrap();
    }

    let mut seen = 0;
    let count = db
        .foreach(
            b"",
            None,
            |_, _| {
                seen += 1;
                Ok(seen < 2)
            },
            false,
        )
        .unwrap();

    assert_eq!(count, 2);
    assert_eq!(seen, 2);
}

#[test]
fn test_foreach_visitor_may_delete_current_key() {
    let (_temp, path) = setup_temp_db();
    let db = create_db(&path);

    for key in [b"a" as &[u8], b"b", b"c"] {
        db.store(key, Some(b"v"), Precondition::None).unwrap();
    }

    let mut txn = db.begin(TxnMode::Exclusive).unwrap();
    let mut seen = Vec::new();
    txn.foreach(
        b"",
        None,
        |txn, key, _| {
            seen.push(key.to_vec());
            let key = key.to_vec();
            txn.delete(&key)?;
            Ok(true)
        },
        false,
    )
    .unwrap();
    txn.commit().unwrap();

    // deleting the current record never derails the traversal
    assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    assert_eq!(db.num_records(), 0);
    db.check_consistency().unwrap();
}

#[test]
fn test_foreach_visitor_insert_ahead_is_visited() {
    let (_temp, path) = setup_temp_db();
    let db = create_db(&path);

    db.store(b"a", Some(b"v"), Precondition::None).unwrap();
    db.store(b"c", Some(b"v"), Precondition::None).unwrap();

    let mut txn = db.begin(TxnMode::Exclusive).unwrap();
    let mut seen = Vec::new();
    txn.foreach(
        b"",
        None,
        |txn, key, _| {
            seen.push(key.to_vec());
            if key == b"a" {
                // lands between the current key and "c"
                txn.store(b"b", Some(b"inserted"), Precondition::None)?;
            }
            Ok(true)
        },
        false,
    )
    .unwrap();
    txn.commit().unwrap();

    assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
}

#[test]
fn test_foreach_visitor_replace_current_is_not_repeated() {
    let (_temp, path) = setup_temp_db();
    let db = create_db(&path);

    db.store(b"a", Some(b"old"), Precondition::None).unwrap();
    db.store(b"b", Some(b"old"), Precondition::None).unwrap();

    let mut txn = db.begin(TxnMode::Exclusive).unwrap();
    let mut visits = 0;
    txn.foreach(
        b"",
        None,
        |txn, key, _| {
            visits += 1;
            let key = key.to_vec();
            txn.store(&key, Some(b"new"), Precondition::None)?;
            Ok(true)
        },
        false,
    )
    .unwrap();
    txn.commit().unwrap();

    assert_eq!(visits, 2);
    assert_eq!(db.fetch(b"a").unwrap(), Some(b"new".to_vec()));
    assert_eq!(db.fetch(b"b").unwrap(), Some(b"new".to_vec()));
}

// =============================================================================
// Generation Snapshot Tests
// =============================================================================

#[test]
fn test_transaction_records_generation() {
    let (_temp, path) = setup_temp_db();
    let db = create_db(&path);

    let txn = db.begin(TxnMode::Shared).unwrap();
    assert_eq!(txn.generation(), db.generation());
    txn.abort().unwrap();
}
