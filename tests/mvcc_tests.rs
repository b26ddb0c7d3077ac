//! Tests for MVCC snapshot cursors
//!
//! These tests verify:
//! - A pinned cursor keeps reading its open-time snapshot while another
//!   handle commits, with the reader yielding its lock to let the writer in
//! - Snapshot stability across a concurrent repack (the pinned view holds
//!   the pre-repack file alive)
//! - An exclusive transaction's MVCC cursor still sees its own writes

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use skipfile::{CursorOptions, Db, OpenOptions, Precondition};
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

/// Yield the reader's lock until the writer thread finishes; the writer
/// blocks on the exclusive lock and slips in during a yield gap.
fn yield_until_done(db: &Db, writer: &thread::JoinHandle<()>) {
    while !writer.is_finished() {
        db.yield_lock().unwrap();
        thread::sleep(Duration::from_millis(1));
    }
}

// =============================================================================
// Snapshot Isolation Tests
// =============================================================================

#[test]
fn test_mvcc_cursor_ignores_later_commits() {
    let (_temp, path) = setup_temp_db();
    let db = create_db(&path);

    db.store(b"apple", Some(b"val_a"), Precondition::None).unwrap();
    db.store(b"banana", Some(b"old_b"), Precondition::None).unwrap();

    let mut cursor = db
        .begin_cursor(b"", CursorOptions::new().shared(true).mvcc(true))
        .unwrap();

    let writer_path = path.clone();
    let writer = thread::spawn(move || {
        let db = Db::open(&writer_path, OpenOptions::new()).unwrap();
        db.store(b"banana", Some(b"new_b"), Precondition::None).unwrap();
        db.store(b"cherry", Some(b"val_c"), Precondition::None).unwrap();
        db.delete(b"apple").unwrap();
    });

    yield_until_done(&db, &writer);
    writer.join().unwrap();

    // the cursor still sees the open-time state, updates and all
    assert_eq!(
        cursor.next().unwrap(),
        Some((b"apple".to_vec(), b"val_a".to_vec()))
    );
    assert_eq!(
        cursor.next().unwrap(),
        Some((b"banana".to_vec(), b"old_b".to_vec()))
    );
    assert_eq!(cursor.next().unwrap(), None);
    cursor.abort().unwrap();

    // fresh reads see the committed updates
    assert_eq!(db.fetch(b"apple").unwrap(), None);
    assert_eq!(db.fetch(b"banana").unwrap(), Some(b"new_b".to_vec()));
    assert_eq!(db.fetch(b"cherry").unwrap(), Some(b"val_c".to_vec()));
}

#[test]
fn test_mvcc_cursor_survives_repack() {
    let (_temp, path) = setup_temp_db();
    let db = create_db(&path);

    db.store(b"apple", Some(b"val_a"), Precondition::None).unwrap();
    db.store(b"banana", Some(b"old_b"), Precondition::None).unwrap();
    db.delete(b"apple").unwrap();
    let generation = db.generation();

    let mut cursor = db
        .begin_cursor(b"", CursorOptions::new().shared(true).mvcc(true))
        .unwrap();

    let writer_path = path.clone();
    let writer = thread::spawn(move || {
        let db = Db::open(&writer_path, OpenOptions::new()).unwrap();
        db.store(b"banana", Some(b"new_b"), Precondition::None).unwrap();
        // rename-swaps a fresh file over the path
        db.repack().unwrap();
    });

    yield_until_done(&db, &writer);
    writer.join().unwrap();

    // the snapshot reads the pre-repack file, which the pinned view
    // keeps alive past the rename
    assert_eq!(
        cursor.next().unwrap(),
        Some((b"banana".to_vec(), b"old_b".to_vec()))
    );
    assert_eq!(cursor.next().unwrap(), None);
    cursor.abort().unwrap();

    assert_eq!(db.generation(), generation + 1);
    assert_eq!(db.fetch(b"banana").unwrap(), Some(b"new_b".to_vec()));
    db.check_consistency().unwrap();
}

// =============================================================================
// Writer Self-Visibility Tests
// =============================================================================

#[test]
fn test_mvcc_cursor_on_write_transaction_sees_pending_writes() {
    let (_temp, path) = setup_temp_db();
    let db = create_db(&path);

    db.store(b"a", Some(b"committed"), Precondition::None).unwrap();

    let mut txn = db.begin(skipfile::TxnMode::Exclusive).unwrap();
    txn.store(b"a", Some(b"pending"), Precondition::None).unwrap();
    txn.store(b"b", Some(b"pending"), Precondition::None).unwrap();

    let mut seen = Vec::new();
    {
        let mut cursor = txn
            .begin_cursor(b"", CursorOptions::new().mvcc(true))
            .unwrap();
        while let Some((key, value)) = cursor.next().unwrap() {
            seen.push((key, value));
        }
    }
    txn.abort().unwrap();

    assert_eq!(
        seen,
        vec![
            (b"a".to_vec(), b"pending".to_vec()),
            (b"b".to_vec(), b"pending".to_vec())
        ]
    );
}
