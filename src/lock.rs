//! Lock Manager
//!
//! Per-file advisory locking coordinating one exclusive writer against
//! many concurrent shared readers, across threads and processes.
//!
//! ## Model
//! States per handle: `Unlocked`, `Shared(n)`, `Exclusive`. The OS-level
//! lock is `flock(2)` on the handle's own file descriptor; flock conflicts
//! between distinct open file descriptions, so two handles in one process
//! coordinate exactly like two processes. Acquisition blocks by default;
//! non-blocking mode turns a would-block into `Locked`.
//!
//! Nested acquisitions on one handle never reach flock: additional shared
//! holders bump a count under the already-held shared lock, and any
//! acquisition that would convert the lock on the same fd (shared under
//! exclusive, exclusive under anything) fails `Locked` instead, because a
//! same-fd flock call silently converts the lock rather than conflicting.

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;

use tracing::trace;

use crate::error::{Result, SkipError};

/// Lock state of one handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockState {
    Unlocked,
    /// n shared holders on this handle share one flock
    Shared(u32),
    Exclusive,
}

/// Per-handle lock state machine over an OS advisory file lock
///
/// Constructed per opened file and torn down on close; serialized by the
/// handle's state mutex, so no interior locking is needed here.
pub(crate) struct LockManager {
    state: LockState,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            state: LockState::Unlocked,
        }
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    /// Acquire a shared lock (or join the existing one)
    pub fn acquire_shared(&mut self, file: &File, nonblocking: bool) -> Result<()> {
        match self.state {
            LockState::Unlocked => {
                flock(file, libc::LOCK_SH, nonblocking)?;
                self.state = LockState::Shared(1);
                trace!("acquired shared lock");
                Ok(())
            }
            LockState::Shared(n) => {
                self.state = LockState::Shared(n + 1);
                Ok(())
            }
            LockState::Exclusive => Err(SkipError::Locked),
        }
    }

    /// Acquire the exclusive lock; fails `Locked` if this handle already
    /// holds any lock
    pub fn acquire_exclusive(&mut self, file: &File, nonblocking: bool) -> Result<()> {
        match self.state {
            LockState::Unlocked => {
                flock(file, libc::LOCK_EX, nonblocking)?;
                self.state = LockState::Exclusive;
                trace!("acquired exclusive lock");
                Ok(())
            }
            _ => Err(SkipError::Locked),
        }
    }

    /// Release one shared holder, dropping the flock when the last leaves
    pub fn release_shared(&mut self, file: &File) -> Result<()> {
        match self.state {
            LockState::Shared(1) => {
                flock(file, libc::LOCK_UN, false)?;
                self.state = LockState::Unlocked;
                trace!("released shared lock");
                Ok(())
            }
            LockState::Shared(n) => {
                self.state = LockState::Shared(n - 1);
                Ok(())
            }
            _ => Err(SkipError::internal("release_shared without shared lock")),
        }
    }

    /// Release the exclusive lock
    pub fn release_exclusive(&mut self, file: &File) -> Result<()> {
        match self.state {
            LockState::Exclusive => {
                flock(file, libc::LOCK_UN, false)?;
                self.state = LockState::Unlocked;
                trace!("released exclusive lock");
                Ok(())
            }
            _ => Err(SkipError::internal(
                "release_exclusive without exclusive lock",
            )),
        }
    }

    /// Voluntarily drop and reacquire the shared lock so a waiting writer
    /// can proceed. Valid only for shared holders: an in-progress write
    /// transaction is not a valid durable state for another writer to
    /// build on, so yielding under the exclusive lock fails `Locked`.
    /// With no lock held this is a no-op.
    pub fn yield_shared(&mut self, file: &File) -> Result<()> {
        match self.state {
            LockState::Shared(_) => {
                flock(file, libc::LOCK_UN, false)?;
                trace!("yielded shared lock");
                flock(file, libc::LOCK_SH, false)?;
                trace!("reacquired shared lock after yield");
                Ok(())
            }
            LockState::Exclusive => Err(SkipError::Locked),
            LockState::Unlocked => Ok(()),
        }
    }

    /// Re-take the OS lock on a fresh fd after a repack swap replaced the
    /// file out from under a shared holder. The handle's logical state is
    /// unchanged; the stale fd's lock dies with the old `File`.
    pub fn relock_shared(&mut self, file: &File) -> Result<()> {
        match self.state {
            LockState::Shared(_) => {
                flock(file, libc::LOCK_SH, false)?;
                trace!("reacquired shared lock on swapped file");
                Ok(())
            }
            _ => Err(SkipError::internal("relock_shared without shared lock")),
        }
    }
}

/// Thin flock wrapper: blocking unless `nonblocking`, EINTR-safe, and
/// mapping EWOULDBLOCK to `Locked`
fn flock(file: &File, op: libc::c_int, nonblocking: bool) -> Result<()> {
    let op = if nonblocking { op | libc::LOCK_NB } else { op };
    loop {
        let rc = unsafe { libc::flock(file.as_raw_fd(), op) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINTR) => continue,
            Some(libc::EWOULDBLOCK) => return Err(SkipError::Locked),
            _ => return Err(SkipError::Io(err)),
        }
    }
}
