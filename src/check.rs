//! Consistency Checker and structural dump
//!
//! ## Responsibilities
//! - Validate the index and checksum invariants across the whole file:
//!   level-0 visits every current record in strictly ascending key order,
//!   record checksums match, every level-L link targets a record linked at
//!   all lower levels, and the header accounting matches a fresh recount
//! - Tolerate an uncommitted tail on handles that cannot rewind it: links
//!   into the tail are resolved back to their committed versions, the way
//!   reads resolve them
//! - Render a human-readable structural report for debugging

use std::collections::HashSet;

use crate::error::{Result, SkipError};
use crate::format::{Header, Record, RecordKind, HEADER_SIZE, HEAD_OFFSET, MAX_LEVEL};
use crate::index;
use crate::store::ReadView;

/// Verify every structural invariant, returning the first violation found.
///
/// `has_tail` marks a file with appended-but-uncommitted bytes past the
/// header's `current_size` (a crashed writer, seen by a shared handle that
/// cannot rewind). Level-0 links may then legitimately land in the tail;
/// each is resolved through its version chain to the committed state, and
/// the upper-level validation is skipped since those slots are mid-splice
/// until the next writable open relinks them.
pub(crate) fn check(view: &ReadView, header: &Header, has_tail: bool) -> Result<()> {
    let committed = header.current_size;

    let head = view.read_record(HEAD_OFFSET)?;
    if head.kind != RecordKind::Head || head.level as usize != MAX_LEVEL {
        return Err(SkipError::internal("malformed head sentinel"));
    }

    // ---- level-0 walk: ordering, checksums, accounting ----------------------
    let mut chain_offsets: HashSet<u64> = HashSet::new();
    let mut records: Vec<Record> = Vec::new();
    let mut live = 0u64;
    let mut live_bytes = 0u64;
    let mut prev_key: Option<Vec<u8>> = None;

    let mut off = head.next[0];
    while off != 0 {
        if off < HEAD_OFFSET + head.len() || (!has_tail && off >= committed) {
            return Err(SkipError::internal(format!(
                "level-0 link outside committed region: {}",
                off
            )));
        }
        // read_record verifies the checksum unless checksums are disabled
        let rec = view.read_record(off)?;
        if rec.kind == RecordKind::Head {
            return Err(SkipError::internal(format!(
                "second head sentinel at offset {}",
                off
            )));
        }
        if let Some(prev) = &prev_key {
            if rec.key.as_slice() <= prev.as_slice() {
                return Err(SkipError::internal(format!(
                    "key order violation at offset {}",
                    off
                )));
            }
        }
        prev_key = Some(rec.key.clone());
        // a tail record counts as whatever committed version it replaced
        if let Some(visible) = index::resolve(view, &rec)? {
            live += 1;
            live_bytes += visible.len();
        }
        chain_offsets.insert(off);
        off = rec.next[0];
        records.push(rec);
    }

    if live != header.num_records {
        return Err(SkipError::internal(format!(
            "record count mismatch: header says {}, recount says {}",
            header.num_records, live
        )));
    }
    let accounted = HEADER_SIZE + head.len() + live_bytes + header.dirty_size;
    if accounted != committed {
        return Err(SkipError::internal(format!(
            "size accounting mismatch: header size {} + live {} + dirty {} != committed {}",
            HEADER_SIZE + head.len(),
            live_bytes,
            header.dirty_size,
            committed
        )));
    }

    // ---- upper levels: subsequence of level 0, ascending, well-leveled ------
    // a crashed writer leaves the upper slots partially spliced; they are
    // rebuilt wholesale by the next writable open, so there is nothing
    // meaningful to validate until then
    if has_tail {
        return Ok(());
    }
    for l in 1..MAX_LEVEL {
        let mut walked = 0usize;
        let mut prev_key: Option<Vec<u8>> = None;
        let mut off = head.next[l];
        while off != 0 {
            walked += 1;
            if !chain_offsets.contains(&off) {
                return Err(SkipError::internal(format!(
                    "level-{} link targets a record missing from level 0: {}",
                    l, off
                )));
            }
            let rec = view.read_record(off)?;
            if (rec.level as usize) <= l {
                return Err(SkipError::internal(format!(
                    "level-{} link targets a level-{} record at offset {}",
                    l, rec.level, off
                )));
            }
            if let Some(prev) = &prev_key {
                if rec.key.as_slice() <= prev.as_slice() {
                    return Err(SkipError::internal(format!(
                        "level-{} key order violation at offset {}",
                        l, off
                    )));
                }
            }
            off = rec.next[l];
            prev_key = Some(rec.key);
        }

        // a record linked at level L must be linked at every level below,
        // so the level-L chain must cover exactly the records that carry
        // that many slots
        let expected = records.iter().filter(|r| (r.level as usize) > l).count();
        if walked != expected {
            return Err(SkipError::internal(format!(
                "level-{} chain covers {} records, expected {}",
                l, walked, expected
            )));
        }
    }

    Ok(())
}

/// Write a human-readable structural report to stdout.
///
/// Level 0 prints the header summary; level 1 adds per-record detail
/// including index pointers. Read-only; stored state is untouched.
pub(crate) fn dump(view: &ReadView, header: &Header, path: &std::path::Path, level: u8) -> Result<()> {
    println!("skipfile database: {}", path.display());
    println!("  uuid:         {}", header.uuid_string());
    println!("  generation:   {}", header.generation);
    println!("  num_records:  {}", header.num_records);
    println!("  current_size: {}", header.current_size);
    println!("  dirty_size:   {}", header.dirty_size);
    println!("  flags:        {:#06x}", header.flags);
    if level == 0 {
        return Ok(());
    }

    // physical scan of the committed region, in file order
    let mut off = HEAD_OFFSET;
    while off < header.current_size {
        let rec = view.read_record(off)?;
        let kind = match rec.kind {
            RecordKind::Head => "HEAD",
            RecordKind::Add => "ADD",
            RecordKind::Tombstone => "DELETE",
        };
        print!("{:08} {} level={}", off, kind, rec.level);
        if rec.prev_version != 0 {
            print!(" prev={}", rec.prev_version);
        }
        print!(" ptrs=[");
        for (i, n) in rec.next.iter().enumerate() {
            if i > 0 {
                print!(",");
            }
            print!("{}", n);
        }
        print!("]");
        if rec.kind != RecordKind::Head {
            print!(
                " key=\"{}\" vallen={}",
                rec.key.escape_ascii(),
                rec.value.len()
            );
        }
        println!();
        off += rec.len();
    }
    Ok(())
}
