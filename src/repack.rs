//! Compactor (repack)
//!
//! Rewrites the file store, discarding dirty space, producing a smaller
//! file and a new generation.
//!
//! ## Fail-Safe Protocol
//! The rewrite lands in a sibling `.repack` file which is fully written
//! and synced before being renamed over the database path. Interrupted,
//! the original file is untouched and remains fully valid; completed, the
//! swap is adopted wholesale. Handles in other processes notice the inode
//! change on their next lock acquisition and reopen; an open MVCC reader
//! keeps its own reference to the old inode, so versions it still needs
//! outlive the swap (the reference count is the retention watermark).

use std::os::unix::fs::FileExt;

use tracing::{debug, info};

use crate::error::Result;
use crate::format::{random_level, Header, Record, RecordKind, HEAD_OFFSET, MAX_LEVEL};
use crate::store::Store;

/// Pure predicate: is a rewrite worth it?
///
/// True iff the dirty byte count reaches the minimum-rewrite threshold and
/// the file is less than 4x the dirty count, i.e. compaction would reclaim
/// at least a quarter of the file.
pub(crate) fn should_repack(header: &Header, min_rewrite: u64) -> bool {
    header.dirty_size >= min_rewrite && header.current_size < 4 * header.dirty_size
}

/// Rewrite all live records contiguously into a fresh file and swap it
/// into place. Caller must hold the exclusive lock; on return the store
/// has been reopened onto the new file.
pub(crate) fn repack(store: &mut Store) -> Result<()> {
    let old_header = store.header.clone();
    let view = store.committed_view();

    let tmp_path = store.path().with_extension("repack");
    let tmp = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;

    // head sentinel first
    let head = Record {
        offset: HEAD_OFFSET,
        kind: RecordKind::Head,
        level: MAX_LEVEL as u8,
        prev_version: 0,
        next: vec![0; MAX_LEVEL],
        key: Vec::new(),
        value: Vec::new(),
    };
    tmp.write_all_at(&head.encode(store.nochecksum), HEAD_OFFSET)?;
    let mut end = HEAD_OFFSET + head.len();

    // walk live records in key order, linking each fresh record to the
    // running per-level tails as it lands
    let mut tails = [HEAD_OFFSET; MAX_LEVEL];
    let mut num_records = 0u64;
    let mut off = view.read_record(HEAD_OFFSET)?.next[0];
    while off != 0 {
        let rec = view.read_record(off)?;
        off = rec.next[0];
        if rec.kind != RecordKind::Add {
            continue; // tombstones die here
        }
        let level = random_level();
        let fresh = Record {
            offset: end,
            kind: RecordKind::Add,
            level,
            prev_version: 0,
            next: vec![0; level as usize],
            key: rec.key,
            value: rec.value,
        };
        let buf = fresh.encode(store.nochecksum);
        tmp.write_all_at(&buf, end)?;
        for l in 0..level as usize {
            let at = Record::slot_offset(tails[l], l);
            tmp.write_all_at(&end.to_le_bytes(), at)?;
            tails[l] = end;
        }
        num_records += 1;
        end += buf.len() as u64;
    }

    let new_header = Header {
        flags: old_header.flags,
        uuid: old_header.uuid,
        generation: old_header.generation + 1,
        num_records,
        current_size: end,
        dirty_size: 0,
    };
    tmp.write_all_at(&new_header.encode(), 0)?;
    tmp.sync_all()?;
    drop(tmp);

    // adopt wholesale: rename is the commit point
    std::fs::rename(&tmp_path, store.path())?;
    if let Some(parent) = store.path().parent() {
        if let Ok(dir) = std::fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    debug!(
        old_size = old_header.current_size,
        new_size = end,
        "repack rewrote file"
    );
    store.reopen_if_swapped()?;
    info!(
        path = %store.path().display(),
        generation = store.header.generation,
        records = store.header.num_records,
        "repack complete"
    );
    Ok(())
}
