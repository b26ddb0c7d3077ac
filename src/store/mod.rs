//! File Store
//!
//! Append-only container for records in a single file.
//!
//! ## Responsibilities
//! - Open/create the database file and validate its header
//! - Append records at the tail; overwrite pointer slots in place
//! - Track live vs. dirty byte ranges, size, generation, identifier
//! - Rewind uncommitted tails left behind by a crashed writer
//! - Detect a repack swap (renamed-in fresh file) and reopen
//!
//! ## Write Discipline
//! A write transaction appends complete, checksummed records beyond the
//! committed tail (`header.current_size`), then overwrites predecessor
//! pointer slots, and only at commit rewrites the header with the new
//! tail. Any pointer slot value at or beyond the committed tail therefore
//! denotes an uncommitted (or post-snapshot) record, which is what both
//! crash recovery and MVCC resolution key off.

use std::collections::HashSet;
use std::fs::File;
use std::os::unix::fs::{FileExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::config::OpenOptions;
use crate::error::{Result, SkipError};
use crate::format::{Header, Record, RecordKind, HEADER_SIZE, HEAD_OFFSET, MAX_LEVEL};

/// Upper bound on a single key; reads treat anything larger as corrupt,
/// so writes must refuse it too
pub(crate) const MAX_KEY_LEN: u32 = 1 << 28;

/// Upper bound on a single value; reads treat anything larger as corrupt,
/// so writes must refuse it too
pub(crate) const MAX_VAL_LEN: u32 = 1 << 30;

/// A pointer-slot overwrite that can be undone on abort
#[derive(Debug, Clone, Copy)]
pub(crate) struct SlotUndo {
    /// Absolute file offset of the 8-byte slot
    pub at: u64,
    /// The value the slot held before the overwrite
    pub old: u64,
}

// =============================================================================
// ReadView
// =============================================================================

/// A read capability over one file at one visibility horizon
///
/// Records at or beyond `horizon` are post-snapshot (or uncommitted) and
/// must be resolved through their `prev_version` chain before their state
/// may be surfaced. An MVCC cursor clones this view at open; its `Arc`
/// keeps the inode alive across a concurrent repack swap.
#[derive(Clone)]
pub(crate) struct ReadView {
    pub file: Arc<File>,
    pub horizon: u64,
    pub nochecksum: bool,
}

impl ReadView {
    /// Read and decode the record at `offset`
    pub fn read_record(&self, offset: u64) -> Result<Record> {
        let mut head = [0u8; 20];
        self.file
            .read_exact_at(&mut head, offset)
            .map_err(|e| read_err(e, offset))?;

        let (_, level, key_len, val_len, _) = Record::decode_head(&head, offset)?;
        if key_len > MAX_KEY_LEN || val_len > MAX_VAL_LEN {
            return Err(SkipError::internal(format!(
                "implausible record lengths at offset {}: key {}, value {}",
                offset, key_len, val_len
            )));
        }

        let total = 20 + 8 * level as usize + 4 + key_len as usize + val_len as usize;
        let mut buf = vec![0u8; total];
        buf[..20].copy_from_slice(&head);
        self.file
            .read_exact_at(&mut buf[20..], offset + 20)
            .map_err(|e| read_err(e, offset))?;

        Record::decode(&buf, offset, self.nochecksum)
    }

    /// Read a single pointer slot
    pub fn read_slot(&self, record_off: u64, level: usize) -> Result<u64> {
        let mut buf = [0u8; 8];
        let at = Record::slot_offset(record_off, level);
        self.file.read_exact_at(&mut buf, at)?;
        Ok(u64::from_le_bytes(buf))
    }
}

fn read_err(e: std::io::Error, offset: u64) -> SkipError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        SkipError::internal(format!("record read past end of file at offset {}", offset))
    } else {
        SkipError::Io(e)
    }
}

// =============================================================================
// Store
// =============================================================================

/// The open file plus cached header state for one handle
pub(crate) struct Store {
    path: PathBuf,
    file: Arc<File>,
    /// Cached copy of the committed header
    pub header: Header,
    /// Logical append tail; equals `header.current_size` outside a write
    /// transaction
    pub end: u64,
    pub nochecksum: bool,
    pub nosync: bool,
    writable: bool,
}

impl Store {
    /// Open the database file. The header is not read here: a freshly
    /// created file is still empty, and the caller decides between
    /// `init_file` and `refresh_header` under the appropriate lock.
    pub fn open(path: &Path, opts: &OpenOptions) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(!opts.shared)
            .create(opts.create && !opts.shared)
            .open(path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    SkipError::NotFound
                } else {
                    SkipError::Io(e)
                }
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Arc::new(file),
            header: Header::fresh(opts.nochecksum), // placeholder until read
            end: 0,
            nochecksum: opts.nochecksum,
            nosync: opts.nosync,
            writable: !opts.shared,
        })
    }

    /// Initialize a brand-new database into an empty file: header plus the
    /// head sentinel. The caller must hold the exclusive lock.
    pub fn init_file(&mut self) -> Result<()> {
        let mut header = Header::fresh(self.nochecksum);

        let head = Record {
            offset: HEAD_OFFSET,
            kind: RecordKind::Head,
            level: MAX_LEVEL as u8,
            prev_version: 0,
            next: vec![0; MAX_LEVEL],
            key: Vec::new(),
            value: Vec::new(),
        };
        let buf = head.encode(self.nochecksum);
        self.file.write_all_at(&buf, HEAD_OFFSET)?;

        header.current_size = HEAD_OFFSET + head.len();
        self.file.write_all_at(&header.encode(), 0)?;
        if !self.nosync {
            self.file.sync_all()?;
        }

        self.end = header.current_size;
        self.nochecksum = self.nochecksum || header.nochecksum();
        self.header = header;
        debug!(path = %self.path.display(), uuid = %self.header.uuid_string(), "created database");
        Ok(())
    }

    /// Re-read and validate the on-disk header, resetting the append tail
    pub fn refresh_header(&mut self) -> Result<()> {
        let mut buf = [0u8; HEADER_SIZE as usize];
        self.file.read_exact_at(&mut buf, 0).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                SkipError::internal("file too short for header")
            } else {
                SkipError::Io(e)
            }
        })?;
        let header = Header::decode(&buf)?;
        // a file created without checksums is always read without them
        self.nochecksum = self.nochecksum || header.nochecksum();
        self.end = header.current_size;
        self.header = header;
        Ok(())
    }

    /// Whether the file on disk was swapped (repacked by another process)
    /// since this fd was opened; if so, reopen and re-read the header.
    /// Old `ReadView` clones keep the previous inode alive.
    pub fn reopen_if_swapped(&mut self) -> Result<bool> {
        let ours = self.file.metadata()?;
        let theirs = match std::fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SkipError::NotFound)
            }
            Err(e) => return Err(SkipError::Io(e)),
        };
        if ours.ino() == theirs.ino() && ours.dev() == theirs.dev() {
            return Ok(false);
        }

        debug!(path = %self.path.display(), "file was swapped by repack, reopening");
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(self.writable)
            .open(&self.path)?;
        self.file = Arc::new(file);
        self.refresh_header()?;
        Ok(true)
    }

    /// Build a read view at the given horizon over the current fd
    pub fn view(&self, horizon: u64) -> ReadView {
        ReadView {
            file: Arc::clone(&self.file),
            horizon,
            nochecksum: self.nochecksum,
        }
    }

    /// The committed-state view: post-commit bytes are invisible
    pub fn committed_view(&self) -> ReadView {
        self.view(self.header.current_size)
    }

    /// The writer's view: sees its own uncommitted appends
    pub fn writer_view(&self) -> ReadView {
        self.view(u64::MAX)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self) -> &Arc<File> {
        &self.file
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    /// Current physical file length
    pub fn file_len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Append an encoded record at the tail, returning its offset
    pub fn append_record(&mut self, rec: &Record) -> Result<u64> {
        let offset = self.end;
        let buf = rec.encode(self.nochecksum);
        self.file.write_all_at(&buf, offset)?;
        self.end = offset + buf.len() as u64;
        Ok(offset)
    }

    /// Overwrite one pointer slot, recording the previous value for undo
    pub fn write_slot(
        &mut self,
        record_off: u64,
        level: usize,
        value: u64,
        undo: &mut Vec<SlotUndo>,
    ) -> Result<()> {
        let at = Record::slot_offset(record_off, level);
        let mut old = [0u8; 8];
        self.file.read_exact_at(&mut old, at)?;
        undo.push(SlotUndo {
            at,
            old: u64::from_le_bytes(old),
        });
        self.file.write_all_at(&value.to_le_bytes(), at)?;
        Ok(())
    }

    /// Force pending writes to stable storage
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Commit: persist `header` with the tail advanced to `end`.
    /// Data is flushed before the header and the header after, unless
    /// `nosync` was requested.
    pub fn commit_header(&mut self, mut header: Header) -> Result<()> {
        header.current_size = self.end;
        if !self.nosync {
            self.file.sync_all()?;
        }
        self.file.write_all_at(&header.encode(), 0)?;
        if !self.nosync {
            self.file.sync_all()?;
        }
        self.header = header;
        Ok(())
    }

    /// Abort: undo pointer-slot overwrites (newest first) and drop the
    /// uncommitted tail
    pub fn rollback(&mut self, undo: &[SlotUndo]) -> Result<()> {
        for u in undo.iter().rev() {
            self.file.write_all_at(&u.old.to_le_bytes(), u.at)?;
        }
        self.file.set_len(self.header.current_size)?;
        self.end = self.header.current_size;
        Ok(())
    }

    // =========================================================================
    // Crash Recovery
    // =========================================================================

    /// Rewind an uncommitted tail left by a crashed writer.
    ///
    /// The committed region's pointer slots may have been overwritten by
    /// the dead transaction, so every slot is recomputed from scratch:
    /// scan the committed records, drop the versions superseded via
    /// `prev_version`, relink the survivors in key order, then truncate the
    /// file to the committed tail. The header itself was never touched by
    /// the dead transaction. Caller must hold the exclusive lock.
    pub fn rewind_tail(&mut self) -> Result<()> {
        let committed = self.header.current_size;
        let file_len = self.file_len()?;
        if file_len <= committed {
            return Ok(());
        }
        debug!(
            path = %self.path.display(),
            committed,
            file_len,
            "rewinding uncommitted tail"
        );

        let view = self.view(committed);

        // physical scan of the committed region
        let head = view.read_record(HEAD_OFFSET)?;
        let mut offset = HEAD_OFFSET + head.len();
        let mut records: Vec<(u64, Vec<u8>, u8)> = Vec::new();
        let mut superseded: HashSet<u64> = HashSet::new();
        while offset < committed {
            let rec = view.read_record(offset)?;
            if rec.prev_version != 0 {
                superseded.insert(rec.prev_version);
            }
            let len = rec.len();
            records.push((offset, rec.key, rec.level));
            offset += len;
        }

        // survivors, in key order
        let mut current: Vec<(u64, Vec<u8>, u8)> = records
            .into_iter()
            .filter(|(off, _, _)| !superseded.contains(off))
            .collect();
        current.sort_by(|a, b| a.1.cmp(&b.1));
        for pair in current.windows(2) {
            if pair[0].1 == pair[1].1 {
                return Err(SkipError::internal(format!(
                    "duplicate current key during rewind at offsets {} and {}",
                    pair[0].0, pair[1].0
                )));
            }
        }

        // relink every chain from scratch
        let mut undo = Vec::new(); // not replayed; rewind is one-way
        let mut tails = [HEAD_OFFSET; MAX_LEVEL];
        for (off, _, level) in &current {
            for l in 0..*level as usize {
                self.write_slot(tails[l], l, *off, &mut undo)?;
                tails[l] = *off;
            }
        }
        for (l, tail) in tails.iter().enumerate() {
            self.write_slot(*tail, l, 0, &mut undo)?;
        }

        self.file.set_len(committed)?;
        self.end = committed;
        if !self.nosync {
            self.file.sync_all()?;
        }
        Ok(())
    }
}
