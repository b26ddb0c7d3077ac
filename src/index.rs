//! Skip Index
//!
//! A probabilistic multi-level linked structure over the records stored in
//! the file, giving O(log n) expected search, insert-position-finding, and
//! ordered traversal.
//!
//! ## Responsibilities
//! - Descend the express lanes to locate a key and its per-level
//!   predecessors
//! - Splice new record versions into the chains (append + slot overwrite)
//! - Resolve which version of a chain record is visible at a view's
//!   horizon (MVCC)
//!
//! The structure is an arena of records addressed by file offset: forward
//! links are byte offsets, not in-memory references. Navigation may pass
//! through post-horizon records freely (their keys are valid for
//! comparison); only when surfacing a record's state does the horizon
//! matter, at which point `resolve` walks the `prev_version` chain back to
//! the newest version below the horizon.

use crate::error::{Result, SkipError};
use crate::format::{random_level, Record, RecordKind, HEAD_OFFSET, MAX_LEVEL};
use crate::store::{ReadView, SlotUndo, Store};

// =============================================================================
// Search
// =============================================================================

/// Result of a predecessor search for one key
pub(crate) struct Search {
    /// Offset of the rightmost record with key < target, per level
    /// (the head sentinel when no such record exists)
    pub update_off: [u64; MAX_LEVEL],
    /// The pointer-slot value of that predecessor, per level
    pub update_next: [u64; MAX_LEVEL],
    /// The chain record (current version) whose key equals the target,
    /// which may be a tombstone
    pub found: Option<Record>,
}

/// Descend from the head sentinel collecting per-level predecessors
pub(crate) fn search(view: &ReadView, key: &[u8]) -> Result<Search> {
    let head = view.read_record(HEAD_OFFSET)?;
    if head.kind != RecordKind::Head {
        return Err(SkipError::internal("missing head sentinel"));
    }

    let mut update_off = [HEAD_OFFSET; MAX_LEVEL];
    let mut update_next = [0u64; MAX_LEVEL];
    let mut node = head;

    for l in (0..MAX_LEVEL).rev() {
        loop {
            let nxt_off = node.next[l];
            if nxt_off == 0 {
                break;
            }
            let nxt = view.read_record(nxt_off)?;
            if nxt.key.as_slice() < key {
                node = nxt;
            } else {
                break;
            }
        }
        update_off[l] = node.offset;
        update_next[l] = node.next[l];
    }

    let found = match update_next[0] {
        0 => None,
        off => {
            let rec = view.read_record(off)?;
            if rec.key.as_slice() == key {
                Some(rec)
            } else {
                None
            }
        }
    };

    Ok(Search {
        update_off,
        update_next,
        found,
    })
}

/// First chain record with key >= target, if any
pub(crate) fn lower_bound(view: &ReadView, key: &[u8]) -> Result<Option<Record>> {
    let s = search(view, key)?;
    match s.update_next[0] {
        0 => Ok(None),
        off => Ok(Some(view.read_record(off)?)),
    }
}

// =============================================================================
// Version Resolution (MVCC)
// =============================================================================

/// Resolve the version of a chain record visible at the view's horizon.
///
/// A record at or beyond the horizon was written after the snapshot; its
/// `prev_version` chain leads back to the state the snapshot should see.
/// Returns `None` when the key is invisible: deleted (tombstone) or
/// created entirely after the snapshot.
pub(crate) fn resolve(view: &ReadView, rec: &Record) -> Result<Option<Record>> {
    let mut cur = rec.clone();
    while cur.offset >= view.horizon {
        if cur.prev_version == 0 {
            return Ok(None);
        }
        cur = view.read_record(cur.prev_version)?;
    }
    match cur.kind {
        RecordKind::Add => Ok(Some(cur)),
        _ => Ok(None),
    }
}

/// Exact-match fetch: the visible live record for `key`, if any
pub(crate) fn fetch_exact(view: &ReadView, key: &[u8]) -> Result<Option<Record>> {
    let s = search(view, key)?;
    match s.found {
        None => Ok(None),
        Some(chain) => resolve(view, &chain),
    }
}

/// Walk forward from `key` to the first chain record (at-or-after when
/// `inclusive`, strictly after otherwise) whose resolved version is live,
/// returning that visible version
pub(crate) fn seek_visible(
    view: &ReadView,
    key: &[u8],
    inclusive: bool,
) -> Result<Option<Record>> {
    let mut chain = lower_bound(view, key)?;
    loop {
        let Some(c) = chain else {
            return Ok(None);
        };
        if inclusive || c.key.as_slice() > key {
            if let Some(visible) = resolve(view, &c)? {
                return Ok(Some(visible));
            }
        }
        chain = match c.next[0] {
            0 => None,
            off => Some(view.read_record(off)?),
        };
    }
}

// =============================================================================
// Insert / Splice
// =============================================================================

/// Accounting deltas produced by one splice
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct InsertStats {
    /// Change in the live record count
    pub num_delta: i64,
    /// Bytes newly reclaimable by compaction
    pub dirty_delta: u64,
}

/// Splice a new record version (or tombstone) into the chains.
///
/// `value = None` writes a tombstone. Deleting an absent (or already
/// deleted) key writes nothing and succeeds silently. The new record is
/// appended in full before any committed pointer slot is overwritten, so
/// an interrupted transaction can always be rewound.
pub(crate) fn insert(
    store: &mut Store,
    undo: &mut Vec<SlotUndo>,
    key: &[u8],
    value: Option<&[u8]>,
) -> Result<InsertStats> {
    let view = store.writer_view();
    let s = search(&view, key)?;

    let existing = s.found;
    let existing_live = matches!(&existing, Some(e) if e.kind == RecordKind::Add);
    if value.is_none() && !existing_live {
        // deleting what is not there: silent success, no bytes written
        return Ok(InsertStats::default());
    }

    let level = random_level();
    let kind = match value {
        Some(_) => RecordKind::Add,
        None => RecordKind::Tombstone,
    };

    // forward pointers: inherit the superseded record's links where it has
    // them, the predecessors' links elsewhere
    let mut next = vec![0u64; level as usize];
    for (l, slot) in next.iter_mut().enumerate() {
        *slot = match &existing {
            Some(e) if l < e.level as usize => e.next[l],
            _ => s.update_next[l],
        };
    }

    let rec = Record {
        offset: 0, // assigned by append
        kind,
        level,
        prev_version: existing.as_ref().map_or(0, |e| e.offset),
        next,
        key: key.to_vec(),
        value: value.unwrap_or_default().to_vec(),
    };
    let new_off = store.append_record(&rec)?;

    // splice in at the new record's levels
    for l in 0..level as usize {
        store.write_slot(s.update_off[l], l, new_off, undo)?;
    }
    // unlink the superseded record from any levels above the new one
    if let Some(e) = &existing {
        for l in (level as usize)..(e.level as usize) {
            store.write_slot(s.update_off[l], l, e.next[l], undo)?;
        }
    }

    let mut stats = InsertStats::default();
    // a superseded tombstone was already dirty the moment it landed
    if let Some(e) = &existing {
        if e.kind == RecordKind::Add {
            stats.dirty_delta += e.len();
        }
    }
    if kind == RecordKind::Tombstone {
        // the tombstone itself is reclaimable the moment it lands
        stats.dirty_delta += rec.len();
    }
    stats.num_delta = match (existing_live, kind) {
        (false, RecordKind::Add) => 1,
        (true, RecordKind::Tombstone) => -1,
        _ => 0,
    };

    Ok(stats)
}
