//! Open options and tunables for skipfile
//!
//! Centralized configuration with sensible defaults.

/// Options controlling how a database file is opened
#[derive(Debug, Clone)]
pub struct OpenOptions {
    // -------------------------------------------------------------------------
    // Open Mode
    // -------------------------------------------------------------------------
    /// Create the file if it does not exist (otherwise open fails NotFound)
    pub create: bool,

    /// Open for concurrent shared access only; any write attempt fails
    /// with `ReadOnly`
    pub shared: bool,

    // -------------------------------------------------------------------------
    // Durability
    // -------------------------------------------------------------------------
    /// Skip the durability flush on commit (unsafe but fast)
    pub nosync: bool,

    // -------------------------------------------------------------------------
    // Integrity
    // -------------------------------------------------------------------------
    /// Skip checksum verification and generation (recovery tooling)
    pub nochecksum: bool,

    // -------------------------------------------------------------------------
    // Lock Acquisition
    // -------------------------------------------------------------------------
    /// A lock acquisition that would block fails immediately with `Locked`
    pub nonblocking: bool,

    // -------------------------------------------------------------------------
    // Compaction Tunables
    // -------------------------------------------------------------------------
    /// Minimum dirty byte count before `should_repack` recommends a rewrite
    pub min_rewrite: u64,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            create: false,
            shared: false,
            nosync: false,
            nochecksum: false,
            nonblocking: false,
            min_rewrite: 16 * 1024,
        }
    }
}

impl OpenOptions {
    /// Create options with all defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the file if absent
    pub fn create(mut self, yes: bool) -> Self {
        self.create = yes;
        self
    }

    /// Open read-only for concurrent shared access
    pub fn shared(mut self, yes: bool) -> Self {
        self.shared = yes;
        self
    }

    /// Skip the durability flush on commit
    pub fn nosync(mut self, yes: bool) -> Self {
        self.nosync = yes;
        self
    }

    /// Skip checksum verification and generation
    pub fn nochecksum(mut self, yes: bool) -> Self {
        self.nochecksum = yes;
        self
    }

    /// Fail immediately instead of waiting for locks
    pub fn nonblocking(mut self, yes: bool) -> Self {
        self.nonblocking = yes;
        self
    }

    /// Set the minimum dirty byte count for `should_repack` (in bytes)
    pub fn min_rewrite(mut self, bytes: u64) -> Self {
        self.min_rewrite = bytes;
        self
    }
}

/// Transaction kind: shared reader or exclusive writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnMode {
    /// Any number of shared holders may coexist
    Shared,
    /// Exactly one exclusive holder; observes all previously committed writes
    Exclusive,
}

/// Precondition checked by `store`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precondition {
    /// No precondition
    #[default]
    None,
    /// Fail with `NotFound` if the key has no live record
    MustExist,
    /// Fail with `Exists` if the key has a live record
    MustNotExist,
}

/// Options controlling cursor behavior
#[derive(Debug, Clone, Copy, Default)]
pub struct CursorOptions {
    /// Restrict traversal to keys sharing the starting byte prefix
    pub prefix: bool,

    /// If a starting key is given, begin strictly after it rather than
    /// at-or-after it
    pub skip_root: bool,

    /// Back the cursor with a shared (read) transaction instead of an
    /// exclusive one
    pub shared: bool,

    /// Pin a consistent read snapshot at open time; concurrent commits are
    /// invisible for the remainder of the traversal
    pub mvcc: bool,
}

impl CursorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the traversal to the starting prefix
    pub fn prefix(mut self, yes: bool) -> Self {
        self.prefix = yes;
        self
    }

    /// Begin strictly after the starting key
    pub fn skip_root(mut self, yes: bool) -> Self {
        self.skip_root = yes;
        self
    }

    /// Use a shared transaction
    pub fn shared(mut self, yes: bool) -> Self {
        self.shared = yes;
        self
    }

    /// Pin an MVCC snapshot at open
    pub fn mvcc(mut self, yes: bool) -> Self {
        self.mvcc = yes;
        self
    }
}
