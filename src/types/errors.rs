//! Error types used across Lockyard.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::state::LockState;

/// Wait statistics carried by the [`Error::Timeout`] and [`Error::Aborted`]
/// variants.
#[derive(Debug, Clone)]
pub struct WaitStats {
    /// The underlying mutex file.
    pub path: PathBuf,
    /// Whether a shared or an exclusive lock was requested.
    pub target: LockState,
    /// Number of seconds waited to acquire the lock.
    pub total: u64,
    /// Timeout limit in seconds (`0` = no timeout).
    pub timeout: u64,
}

impl WaitStats {
    /// Whether the wait ended because the keepalive callback requested it.
    #[must_use]
    pub fn aborted(&self) -> bool {
        self.timeout == 0 || self.total < self.timeout
    }

    /// Whether the wait ended because the timeout limit was exceeded.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        !self.aborted()
    }
}

/// Errors raised by mutex construction and the acquire entry points.
///
/// `try_*` and `unlock*` operations never report a timeout or abort; they
/// only fail with [`Error::Unusable`] on a default-constructed mutex.
#[derive(Debug, Error)]
pub enum Error {
    /// The mutex is a default-constructed placeholder with no backing file.
    #[error("mutex has no backing lock file")]
    Unusable,

    /// Waiting for the lock exceeded the active timeout.
    #[error("unable to obtain {} lock on {}: timeout after {} seconds", .0.target, .0.path.display(), .0.total)]
    Timeout(WaitStats),

    /// The keepalive callback requested to abort the wait.
    #[error("unable to obtain {} lock on {}: aborted after {} seconds", .0.target, .0.path.display(), .0.total)]
    Aborted(WaitStats),

    /// The mutex file is missing, not read/writable, or the OS refused the
    /// first acquire.
    #[error("lock file {} unavailable: {source}", .path.display())]
    Unavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Wait statistics for the timeout/abort variants, `None` otherwise.
    #[must_use]
    pub fn wait_stats(&self) -> Option<&WaitStats> {
        match self {
            Error::Timeout(stats) | Error::Aborted(stats) => Some(stats),
            Error::Unusable | Error::Unavailable { .. } => None,
        }
    }
}

/// Convenient alias for results returning a Lockyard [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
