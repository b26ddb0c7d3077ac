//! Cursor / MVCC Reader
//!
//! Ordered, resumable traversal with an optional prefix bound and optional
//! MVCC pinning that isolates the traversal from concurrent commits.
//!
//! ## MVCC Pinning
//! A cursor opened with `mvcc` captures a read view at open time: the
//! committed tail offset plus its own reference to the file handle.
//! Pointer-slot overwrites by later writers only ever point committed
//! chains at post-snapshot offsets, which the view resolves back through
//! `prev_version` chains, and a repack swaps in a fresh file by rename, so
//! the pinned handle keeps reading the old inode. Together these keep
//! every subsequent `next` call on the pre-commit state.

use crate::config::{CursorOptions, Precondition, TxnMode};
use crate::error::{Result, SkipError};
use crate::index;
use crate::store::ReadView;
use crate::txn::Txn;

/// Who the cursor's transaction belongs to
pub(crate) enum CursorOwner<'t> {
    /// Implicit transaction created for the cursor; finalized by the
    /// cursor's commit/abort (or its drop)
    Owned(Txn),
    /// Borrowed from the caller; left alive when the cursor goes away
    Borrowed(&'t mut Txn),
}

/// Current traversal position
enum Pos {
    /// Before the first call to `next`
    AtStart,
    /// Last key handed out
    After(Vec<u8>),
    /// Traversal exhausted
    Done,
}

/// An ordered, resumable cursor over live records
pub struct Cursor<'t> {
    owner: CursorOwner<'t>,
    start: Vec<u8>,
    opts: CursorOptions,
    /// Pinned MVCC view; `None` reads through the transaction
    pinned: Option<ReadView>,
    pos: Pos,
}

impl<'t> Cursor<'t> {
    pub(crate) fn new(owner: CursorOwner<'t>, start: &[u8], opts: CursorOptions) -> Result<Self> {
        let mut cursor = Self {
            owner,
            start: start.to_vec(),
            opts,
            pinned: None,
            pos: Pos::AtStart,
        };
        if opts.mvcc {
            let pinned = {
                let txn = cursor.txn();
                let st = txn.db().inner().state.lock();
                // an exclusive holder must keep seeing its own pending
                // writes, and no one else can commit under it anyway
                match txn.mode() {
                    TxnMode::Shared => st.store.committed_view(),
                    TxnMode::Exclusive => st.store.writer_view(),
                }
            };
            cursor.pinned = Some(pinned);
        }
        Ok(cursor)
    }

    fn txn(&self) -> &Txn {
        match &self.owner {
            CursorOwner::Owned(t) => t,
            CursorOwner::Borrowed(t) => t,
        }
    }

    fn txn_mut(&mut self) -> &mut Txn {
        match &mut self.owner {
            CursorOwner::Owned(t) => t,
            CursorOwner::Borrowed(t) => t,
        }
    }

    /// Advance strictly forward in key order, returning the next live
    /// record or `None` when the traversal is exhausted
    pub fn next(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let (from, inclusive) = match &self.pos {
            Pos::Done => return Ok(None),
            Pos::AtStart => (self.start.clone(), !self.opts.skip_root),
            Pos::After(k) => (k.clone(), false),
        };

        let step = match &self.pinned {
            Some(view) => {
                index::seek_visible(view, &from, inclusive)?.map(|r| (r.key, r.value))
            }
            None => self.txn().seek_visible(&from, inclusive)?,
        };

        match step {
            Some((key, value)) if !self.opts.prefix || key.starts_with(&self.start) => {
                self.pos = Pos::After(key.clone());
                Ok(Some((key, value)))
            }
            _ => {
                self.pos = Pos::Done;
                Ok(None)
            }
        }
    }

    /// Overwrite the value of the record at the cursor's current position
    /// within the cursor's transaction; ordering is unaffected
    pub fn replace(&mut self, value: &[u8]) -> Result<()> {
        let Pos::After(key) = &self.pos else {
            return Err(SkipError::internal("cursor has no current record"));
        };
        let key = key.clone();
        self.txn_mut().store(&key, Some(value), Precondition::None)
    }

    /// Finalize the cursor's own transaction; only valid when the cursor
    /// owns it
    pub fn commit(self) -> Result<()> {
        match self.owner {
            CursorOwner::Owned(txn) => txn.commit(),
            CursorOwner::Borrowed(_) => Err(SkipError::internal(
                "cursor does not own its transaction",
            )),
        }
    }

    /// Abort the cursor's own transaction; only valid when the cursor
    /// owns it
    pub fn abort(self) -> Result<()> {
        match self.owner {
            CursorOwner::Owned(txn) => txn.abort(),
            CursorOwner::Borrowed(_) => Err(SkipError::internal(
                "cursor does not own its transaction",
            )),
        }
    }
}

// Dropping a borrowing cursor releases only the cursor; an owned
// transaction aborts through its own Drop.
