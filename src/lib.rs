//! skipfile: an embedded, single-file, transactional key-value store
//!
//! Sorted byte-string keys in one append-only file, indexed by an on-disk
//! skip list. One writer at a time (exclusive advisory file lock), any
//! number of concurrent readers (shared locks), and MVCC cursors that see
//! a frozen snapshot while writers keep committing.
//!
//! ## Architecture
//!
//! ```text
//!                    +---------------------------+
//!                    |            Db             |
//!                    |  open / begin / repack    |
//!                    +------+-------------+------+
//!                           |             |
//!                  +--------v----+   +----v--------+
//!                  |     Txn     |   |   Cursor    |
//!                  | fetch/store |   | next/replace|
//!                  +--------+----+   +----+--------+
//!                           |             |
//!              +------------v-------------v-----------+
//!              |          index (skip list)           |
//!              |   search / insert / seek_visible     |
//!              +------------------+-------------------+
//!                                 |
//!              +------------------v-------------------+
//!              |        store (file, header)          |
//!              |  append / slots / commit / rewind    |
//!              +------------------+-------------------+
//!                                 |
//!              +------------------v-------------------+
//!              |      format (records, checksums)     |
//!              +--------------------------------------+
//! ```
//!
//! ## Durability
//!
//! All writes within a transaction are appended past the committed tail;
//! the header's `current_size` field is the commit marker and is only
//! advanced after the data is flushed. A crash mid-transaction leaves a
//! tail that the next writable open rewinds away.
//!
//! ## Example
//!
//! ```no_run
//! use skipfile::{Db, OpenOptions, Precondition, TxnMode};
//!
//! fn main() -> skipfile::Result<()> {
//!     let db = Db::open("data.skipfile", OpenOptions::new().create(true))?;
//!
//!     let mut txn = db.begin(TxnMode::Exclusive)?;
//!     txn.store(b"apple", Some(b"red"), Precondition::None)?;
//!     txn.store(b"banana", Some(b"yellow"), Precondition::MustNotExist)?;
//!     txn.commit()?;
//!
//!     assert_eq!(db.fetch(b"apple")?, Some(b"red".to_vec()));
//!     Ok(())
//! }
//! ```

mod check;
mod config;
mod cursor;
mod db;
mod error;
mod format;
mod index;
mod lock;
mod repack;
mod store;
mod txn;

pub use config::{CursorOptions, OpenOptions, Precondition, TxnMode};
pub use cursor::Cursor;
pub use db::Db;
pub use error::{Result, SkipError};
pub use txn::Txn;

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
