//! Database handle
//!
//! The process-local reference to an opened file store. Multiple handles
//! (even in the same process) may reference the same underlying file; each
//! participates independently in the lock protocol through its own file
//! descriptor. Cloning a `Db` shares one handle.
//!
//! ## Responsibilities
//! - Open/create the file, validate the header, rewind crashed tails
//! - Begin transactions and cursors
//! - Implicit one-shot fetch/store/foreach wrapping a transaction
//! - Repack, consistency checking, dump, metadata accessors

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::check;
use crate::config::{CursorOptions, OpenOptions, Precondition, TxnMode};
use crate::cursor::{Cursor, CursorOwner};
use crate::error::{Result, SkipError};
use crate::lock::{LockManager, LockState};
use crate::repack;
use crate::store::Store;
use crate::txn::{Txn, WriteWork};

/// Handle-internal state behind one mutex: the open file plus the lock
/// state machine. The mutex serializes this handle's threads; cross-handle
/// and cross-process coordination is the flock held by the lock manager.
pub(crate) struct DbState {
    pub store: Store,
    pub lock: LockManager,
}

pub(crate) struct DbInner {
    opts: OpenOptions,
    pub state: Mutex<DbState>,
}

/// An open skipfile database
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Write transactions**: exactly one at a time across all handles and
///   processes, via an exclusive advisory file lock
/// - **Read transactions**: any number concurrently under shared locks
/// - No internal threads: every operation runs on the caller's thread and
///   may block on lock acquisition (unless the handle was opened
///   non-blocking)
#[derive(Clone)]
pub struct Db {
    inner: Arc<DbInner>,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db").finish_non_exhaustive()
    }
}

impl Db {
    // =========================================================================
    // Open / Close
    // =========================================================================

    /// Open a database file.
    ///
    /// Without `create`, a missing file fails `NotFound`. A tail left
    /// behind by a crashed writer is rewound here (writable handles only);
    /// shared handles resolve around it during reads instead.
    pub fn open(path: impl AsRef<Path>, opts: OpenOptions) -> Result<Db> {
        let path = path.as_ref();
        if opts.create && opts.shared {
            // creation needs write access
            return Err(SkipError::ReadOnly);
        }

        let store = Store::open(path, &opts)?;
        let mut state = DbState {
            store,
            lock: LockManager::new(),
        };

        if state.store.file_len()? == 0 && opts.create {
            // brand-new (or racing) file: initialize under the exclusive lock
            state
                .lock
                .acquire_exclusive(state.store.file(), opts.nonblocking)?;
            let init = if state.store.file_len()? == 0 {
                state.store.init_file()
            } else {
                state.store.refresh_header()
            };
            let released = state.lock.release_exclusive(state.store.file());
            init.and(released)?;
        } else {
            state.store.refresh_header()?;
        }

        if !opts.shared && state.store.file_len()? > state.store.header.current_size {
            state
                .lock
                .acquire_exclusive(state.store.file(), opts.nonblocking)?;
            let rewound = (|| {
                state.store.reopen_if_swapped()?;
                state.store.refresh_header()?;
                state.store.rewind_tail()
            })();
            let released = state.lock.release_exclusive(state.store.file());
            rewound.and(released)?;
        }

        info!(
            path = %path.display(),
            uuid = %state.store.header.uuid_string(),
            generation = state.store.header.generation,
            records = state.store.header.num_records,
            "opened database"
        );
        Ok(Db {
            inner: Arc::new(DbInner {
                opts,
                state: Mutex::new(state),
            }),
        })
    }

    /// Open and atomically begin a write transaction on the new handle
    pub fn open_with_txn(path: impl AsRef<Path>, opts: OpenOptions) -> Result<(Db, Txn)> {
        let db = Self::open(path, opts)?;
        let txn = db.begin(TxnMode::Exclusive)?;
        Ok((db, txn))
    }

    /// Close the handle, flushing pending durable writes first. Dropping
    /// the last clone has the same effect minus the flush.
    pub fn close(self) -> Result<()> {
        let st = self.inner.state.lock();
        if st.store.writable() && !self.inner.opts.nosync {
            st.store.sync()?;
        }
        Ok(())
    }

    pub(crate) fn inner(&self) -> &DbInner {
        &self.inner
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Begin a transaction, acquiring the corresponding lock and recording
    /// the snapshot generation.
    ///
    /// Fails `ReadOnly` for an exclusive request on a shared-opened
    /// handle, and `Locked` when the lock cannot be acquired under
    /// non-blocking semantics.
    pub fn begin(&self, mode: TxnMode) -> Result<Txn> {
        let nonblocking = self.inner.opts.nonblocking;
        let mut st = self.inner.state.lock();
        let st = &mut *st;
        match mode {
            TxnMode::Exclusive => {
                if self.inner.opts.shared {
                    return Err(SkipError::ReadOnly);
                }
                lock_exclusive(st, nonblocking)?;
                let prepared = (|| {
                    st.store.refresh_header()?;
                    st.store.rewind_tail()
                })();
                if let Err(e) = prepared {
                    let _ = st.lock.release_exclusive(st.store.file());
                    return Err(e);
                }
                let work = WriteWork {
                    header: st.store.header.clone(),
                    undo: Vec::new(),
                };
                Ok(Txn::new(
                    self.clone(),
                    mode,
                    st.store.header.generation,
                    Some(work),
                ))
            }
            TxnMode::Shared => {
                lock_shared(st, nonblocking)?;
                if let Err(e) = st.store.refresh_header() {
                    let _ = st.lock.release_shared(st.store.file());
                    return Err(e);
                }
                Ok(Txn::new(
                    self.clone(),
                    mode,
                    st.store.header.generation,
                    None,
                ))
            }
        }
    }

    /// Open a cursor backed by its own implicit transaction (shared or
    /// exclusive per the options); the cursor's commit/abort finalizes it
    pub fn begin_cursor(&self, start: &[u8], opts: CursorOptions) -> Result<Cursor<'static>> {
        let mode = if opts.shared {
            TxnMode::Shared
        } else {
            TxnMode::Exclusive
        };
        let txn = self.begin(mode)?;
        Cursor::new(CursorOwner::Owned(txn), start, opts)
    }

    /// Yield this handle's shared lock so a waiting writer can proceed;
    /// fails `Locked` while the exclusive lock is held, no-op when
    /// unlocked
    pub fn yield_lock(&self) -> Result<()> {
        let mut st = self.inner.state.lock();
        let st = &mut *st;
        if st.lock.state() == LockState::Exclusive {
            return Err(SkipError::Locked);
        }
        yield_shared(st)
    }

    // =========================================================================
    // Implicit One-Shot Operations
    // =========================================================================

    /// Fetch under a temporary shared transaction
    pub fn fetch(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let txn = self.begin(TxnMode::Shared)?;
        let result = txn.fetch(key);
        txn.abort()?;
        result
    }

    /// Fetch the smallest live record strictly after `key`
    pub fn fetch_next(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let txn = self.begin(TxnMode::Shared)?;
        let result = txn.fetch_next(key);
        txn.abort()?;
        result
    }

    /// Store under a temporary write transaction, committed on success
    pub fn store(
        &self,
        key: &[u8],
        value: Option<&[u8]>,
        precondition: Precondition,
    ) -> Result<()> {
        let mut txn = self.begin(TxnMode::Exclusive)?;
        match txn.store(key, value, precondition) {
            Ok(()) => txn.commit(),
            Err(e) => {
                let _ = txn.abort();
                Err(e)
            }
        }
    }

    /// Delete under a temporary write transaction; silently succeeds if
    /// the key is absent
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.store(key, None, Precondition::None)
    }

    /// Iterate live records under a temporary shared transaction.
    ///
    /// Reads here run at the committed state as of each step; for a
    /// traversal isolated from concurrent commits, open an MVCC cursor
    /// instead.
    pub fn foreach<F>(
        &self,
        prefix: &[u8],
        filter: Option<&dyn Fn(&[u8], &[u8]) -> bool>,
        mut visit: F,
        always_yield: bool,
    ) -> Result<u64>
    where
        F: FnMut(&[u8], &[u8]) -> Result<bool>,
    {
        let mut txn = self.begin(TxnMode::Shared)?;
        let result = txn.foreach(prefix, filter, |_, k, v| visit(k, v), always_yield);
        let aborted = txn.abort();
        let count = result?;
        aborted?;
        Ok(count)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Force pending durable writes to stable storage, independent of any
    /// transaction boundary
    pub fn sync(&self) -> Result<()> {
        self.inner.state.lock().store.sync()
    }

    /// True iff compaction would reclaim enough space to be worth it.
    /// Pure predicate; no side effects.
    pub fn should_repack(&self) -> bool {
        let st = self.inner.state.lock();
        repack::should_repack(&st.store.header, self.inner.opts.min_rewrite)
    }

    /// Rewrite the file discarding dirty space: tombstones and superseded
    /// versions die, dirty accounting resets, the generation increments.
    /// Holds the exclusive lock for the duration; if interrupted the
    /// database remains in its pre-repack, fully valid state.
    pub fn repack(&self) -> Result<()> {
        if self.inner.opts.shared {
            return Err(SkipError::ReadOnly);
        }
        let mut st = self.inner.state.lock();
        let st = &mut *st;
        lock_exclusive(st, self.inner.opts.nonblocking)?;
        let result = (|| {
            st.store.refresh_header()?;
            st.store.rewind_tail()?;
            repack::repack(&mut st.store)
        })();
        let released = st.lock.release_exclusive(st.store.file());
        result.and(released)
    }

    /// Validate index and checksum invariants across the whole file,
    /// returning the first violation found
    pub fn check_consistency(&self) -> Result<()> {
        let mut st = self.inner.state.lock();
        let st = &mut *st;
        lock_shared(st, self.inner.opts.nonblocking)?;
        let result = (|| {
            st.store.refresh_header()?;
            let has_tail = st.store.file_len()? > st.store.header.current_size;
            check::check(&st.store.committed_view(), &st.store.header, has_tail)
        })();
        let released = st.lock.release_shared(st.store.file());
        result.and(released)
    }

    /// Write a structural report to stdout: level 0 is the header summary,
    /// level 1 adds per-record detail including index pointers
    pub fn dump(&self, level: u8) -> Result<()> {
        let mut st = self.inner.state.lock();
        let st = &mut *st;
        lock_shared(st, self.inner.opts.nonblocking)?;
        let result = (|| {
            st.store.refresh_header()?;
            check::dump(
                &st.store.committed_view(),
                &st.store.header,
                st.store.path(),
                level,
            )
        })();
        let released = st.lock.release_shared(st.store.file());
        result.and(released)
    }

    // =========================================================================
    // Metadata Accessors
    // =========================================================================

    /// The database file path
    pub fn path(&self) -> PathBuf {
        self.inner.state.lock().store.path().to_path_buf()
    }

    /// The stable unique identifier: 32 lowercase hex digits, assigned at
    /// creation, immutable thereafter
    pub fn uuid(&self) -> String {
        self.inner.state.lock().store.header.uuid_string()
    }

    /// The current generation (bumped by each repack)
    pub fn generation(&self) -> u64 {
        self.inner.state.lock().store.header.generation
    }

    /// The current committed file size in bytes
    pub fn size(&self) -> u64 {
        self.inner.state.lock().store.header.current_size
    }

    /// The current live record count
    pub fn num_records(&self) -> u64 {
        self.inner.state.lock().store.header.num_records
    }
}

// =============================================================================
// Lock Acquisition with Swap Detection
// =============================================================================

// A repack in another process renames a fresh file over the path, so a
// lock taken on our (now-orphaned) fd protects nothing. After each real
// flock acquisition, re-stat the path; on a swap, drop the stale lock,
// reopen, and try again on the new inode.

fn lock_exclusive(st: &mut DbState, nonblocking: bool) -> Result<()> {
    loop {
        let file = Arc::clone(st.store.file());
        st.lock.acquire_exclusive(&file, nonblocking)?;
        match st.store.reopen_if_swapped() {
            Ok(false) => return Ok(()),
            Ok(true) => st.lock.release_exclusive(&file)?,
            Err(e) => {
                let _ = st.lock.release_exclusive(&file);
                return Err(e);
            }
        }
    }
}

fn lock_shared(st: &mut DbState, nonblocking: bool) -> Result<()> {
    loop {
        let file = Arc::clone(st.store.file());
        st.lock.acquire_shared(&file, nonblocking)?;
        match st.store.reopen_if_swapped() {
            Ok(false) => return Ok(()),
            Ok(true) => st.lock.release_shared(&file)?,
            Err(e) => {
                let _ = st.lock.release_shared(&file);
                return Err(e);
            }
        }
    }
}

/// Drop and re-take the shared flock so a blocked writer gets a turn. A
/// repack may rename a fresh file in during the window, in which case the
/// reacquired lock sits on the orphaned inode and must be moved onto the
/// new fd before anyone relies on it.
pub(crate) fn yield_shared(st: &mut DbState) -> Result<()> {
    st.lock.yield_shared(st.store.file())?;
    while st.store.reopen_if_swapped()? {
        match st.lock.state() {
            LockState::Shared(_) => st.lock.relock_shared(st.store.file())?,
            _ => break,
        }
    }
    st.store.refresh_header()
}
