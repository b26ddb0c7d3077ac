//! Transaction Manager
//!
//! A transaction owns a lock acquisition and a working view: the committed
//! base plus, for a write transaction, the pending appends not yet made
//! durable.
//!
//! ## Lifecycle
//! `NotStarted → Active(Shared | Exclusive) → {Committed, Aborted}`.
//! `Db::begin` acquires the lock and records the snapshot generation;
//! `commit` makes pending writes durable and releases; `abort` rewinds
//! them. Dropping an active transaction aborts it.
//!
//! ## Read-Your-Writes
//! A write transaction's appends land in the file immediately (only the
//! header commit is deferred), so its own reads run at an unbounded
//! horizon and observe them; shared readers run at the committed horizon.

use tracing::debug;

use crate::config::{CursorOptions, Precondition, TxnMode};
use crate::cursor::{Cursor, CursorOwner};
use crate::db::{yield_shared, Db, DbState};
use crate::error::{Result, SkipError};
use crate::format::Header;
use crate::index;
use crate::store::{ReadView, SlotUndo, MAX_KEY_LEN, MAX_VAL_LEN};

/// Working state of a write transaction
pub(crate) struct WriteWork {
    /// Working copy of the header; accounting updated per store call,
    /// persisted wholesale at commit
    pub header: Header,
    /// Pointer-slot overwrites, replayed in reverse on abort
    pub undo: Vec<SlotUndo>,
}

/// A transaction handle bound to one open database
///
/// Holds the transaction kind, the generation it is reading against, and
/// (for writes) the pending mutations. Must be finished with `commit` or
/// `abort`; dropping an active transaction aborts it.
pub struct Txn {
    db: Db,
    mode: TxnMode,
    snapshot_generation: u64,
    active: bool,
    work: Option<WriteWork>,
}

impl std::fmt::Debug for Txn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Txn")
            .field("mode", &self.mode)
            .field("snapshot_generation", &self.snapshot_generation)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl Txn {
    pub(crate) fn new(
        db: Db,
        mode: TxnMode,
        snapshot_generation: u64,
        work: Option<WriteWork>,
    ) -> Self {
        Self {
            db,
            mode,
            snapshot_generation,
            active: true,
            work,
        }
    }

    /// The transaction kind
    pub fn mode(&self) -> TxnMode {
        self.mode
    }

    /// The generation this transaction reads against
    pub fn generation(&self) -> u64 {
        self.snapshot_generation
    }

    pub(crate) fn db(&self) -> &Db {
        &self.db
    }

    fn ensure_active(&self) -> Result<()> {
        if self.active {
            Ok(())
        } else {
            Err(SkipError::internal("transaction already finished"))
        }
    }

    /// The view this transaction reads through
    pub(crate) fn view(&self, st: &DbState) -> ReadView {
        match self.mode {
            TxnMode::Exclusive => st.store.writer_view(),
            TxnMode::Shared => st.store.committed_view(),
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fetch the live value for `key`, or `None` if absent
    pub fn fetch(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_active()?;
        let st = self.db.inner().state.lock();
        let view = self.view(&st);
        Ok(index::fetch_exact(&view, key)?.map(|r| r.value))
    }

    /// Fetch the smallest live record with key strictly greater than
    /// `key`, or `None` if none exists
    pub fn fetch_next(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.ensure_active()?;
        let st = self.db.inner().state.lock();
        let view = self.view(&st);
        Ok(index::seek_visible(&view, key, false)?.map(|r| (r.key, r.value)))
    }

    /// One traversal step for cursors: first visible record at-or-after
    /// (`inclusive`) or strictly after `key`
    pub(crate) fn seek_visible(
        &self,
        key: &[u8],
        inclusive: bool,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.ensure_active()?;
        let st = self.db.inner().state.lock();
        let view = self.view(&st);
        Ok(index::seek_visible(&view, key, inclusive)?.map(|r| (r.key, r.value)))
    }

    /// Iterate live records in ascending key order, restricted to keys
    /// sharing `prefix` (empty prefix means all keys).
    ///
    /// `filter`, when supplied, is evaluated first and only accepted
    /// records reach `visit`. The visitor receives the transaction and may
    /// mutate through it: the traversal recomputes its position relative
    /// to the last visited key at each step, so an insert after the
    /// current position is visited later in the same pass, replacing the
    /// current value does not repeat it, and deleting the current key
    /// moves on to the next survivor. The visitor returns `false` to stop
    /// early.
    ///
    /// `always_yield` interleaves a voluntary lock yield between records
    /// on shared transactions, for long scans under contention; it does
    /// not change which records are visited.
    pub fn foreach<F>(
        &mut self,
        prefix: &[u8],
        filter: Option<&dyn Fn(&[u8], &[u8]) -> bool>,
        mut visit: F,
        always_yield: bool,
    ) -> Result<u64>
    where
        F: FnMut(&mut Txn, &[u8], &[u8]) -> Result<bool>,
    {
        self.ensure_active()?;
        let mut last: Option<Vec<u8>> = None;
        let mut visited = 0u64;
        loop {
            let step = match &last {
                None => self.seek_visible(prefix, true)?,
                Some(k) => self.seek_visible(k, false)?,
            };
            let Some((key, value)) = step else { break };
            if !key.starts_with(prefix) {
                break;
            }
            if let Some(pred) = filter {
                if !pred(&key, &value) {
                    last = Some(key);
                    continue;
                }
            }
            visited += 1;
            let keep_going = visit(self, &key, &value)?;
            last = Some(key);
            if !keep_going {
                break;
            }
            if always_yield && self.mode == TxnMode::Shared {
                self.yield_lock()?;
            }
        }
        Ok(visited)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Store a value (`Some`) or a tombstone (`None`) for `key`, subject
    /// to `precondition`.
    ///
    /// A zero-length value is a real value, distinct from absent. Deleting
    /// an absent key with no precondition succeeds silently. The mutation
    /// is visible to this transaction's subsequent reads immediately.
    pub fn store(
        &mut self,
        key: &[u8],
        value: Option<&[u8]>,
        precondition: Precondition,
    ) -> Result<()> {
        self.ensure_active()?;
        if self.mode != TxnMode::Exclusive {
            return Err(SkipError::ReadOnly);
        }

        // reads reject lengths past these caps as corruption, so a record
        // that large must never reach the file
        if key.len() > MAX_KEY_LEN as usize {
            return Err(SkipError::internal(format!(
                "key length {} exceeds maximum {}",
                key.len(),
                MAX_KEY_LEN
            )));
        }
        if let Some(val) = value {
            if val.len() > MAX_VAL_LEN as usize {
                return Err(SkipError::internal(format!(
                    "value length {} exceeds maximum {}",
                    val.len(),
                    MAX_VAL_LEN
                )));
            }
        }

        let mut st = self.db.inner().state.lock();
        let st = &mut *st;

        // precondition first: a violated store must write nothing
        let live = index::fetch_exact(&st.store.writer_view(), key)?.is_some();
        match precondition {
            Precondition::MustExist if !live => return Err(SkipError::NotFound),
            Precondition::MustNotExist if live => return Err(SkipError::Exists),
            _ => {}
        }

        let Some(work) = self.work.as_mut() else {
            return Err(SkipError::internal("write transaction without work state"));
        };
        let stats = index::insert(&mut st.store, &mut work.undo, key, value)?;
        work.header.num_records = work
            .header
            .num_records
            .checked_add_signed(stats.num_delta)
            .ok_or_else(|| SkipError::internal("record count underflow"))?;
        work.header.dirty_size += stats.dirty_delta;
        Ok(())
    }

    /// Delete `key`: shorthand for a tombstone store with no precondition
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.store(key, None, Precondition::None)
    }

    // =========================================================================
    // Lock Yield
    // =========================================================================

    /// Voluntarily let a waiting writer in, then reacquire the shared
    /// lock. Only valid on shared transactions: yielding an in-progress
    /// write fails `Locked`.
    pub fn yield_lock(&mut self) -> Result<()> {
        self.ensure_active()?;
        if self.mode == TxnMode::Exclusive {
            return Err(SkipError::Locked);
        }
        let mut st = self.db.inner().state.lock();
        let st = &mut *st;
        yield_shared(st)
    }

    // =========================================================================
    // Cursors
    // =========================================================================

    /// Open a cursor borrowing this transaction; it sees the transaction's
    /// uncommitted writes and leaves the transaction alive on drop
    pub fn begin_cursor(&mut self, start: &[u8], opts: CursorOptions) -> Result<Cursor<'_>> {
        self.ensure_active()?;
        Cursor::new(CursorOwner::Borrowed(self), start, opts)
    }

    // =========================================================================
    // Commit / Abort
    // =========================================================================

    /// Make all pending writes durable (subject to the open-time nosync
    /// option) and release the lock
    pub fn commit(mut self) -> Result<()> {
        self.finish(true)
    }

    /// Discard all pending writes and release the lock
    pub fn abort(mut self) -> Result<()> {
        self.finish(false)
    }

    fn finish(&mut self, commit: bool) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;

        let mut st = self.db.inner().state.lock();
        let st = &mut *st;
        match self.mode {
            TxnMode::Exclusive => {
                let Some(work) = self.work.take() else {
                    return Err(SkipError::internal("write transaction without work state"));
                };
                let result = if commit {
                    st.store.commit_header(work.header).map(|()| {
                        debug!(
                            size = st.store.header.current_size,
                            records = st.store.header.num_records,
                            "committed transaction"
                        );
                    })
                } else {
                    st.store.rollback(&work.undo)
                };
                let released = st.lock.release_exclusive(st.store.file());
                result.and(released)
            }
            TxnMode::Shared => st.lock.release_shared(st.store.file()),
        }
    }
}

impl Drop for Txn {
    fn drop(&mut self) {
        if self.active {
            let _ = self.finish(false);
        }
    }
}
