//! Thin wrapper around the OS advisory file lock.
//!
//! The lock file must already exist and be read/writable by the caller; the
//! wrapper never creates it. All handles opened on the same path contend
//! with each other, including handles within one process (each carries its
//! own open file description).

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::constants::LOCK_POLL_MS;
use crate::types::errors::{Error, Result};

/// An advisory lock on a filesystem path.
///
/// Exclusive and shared acquisitions on the same handle convert the held
/// lock; conversion is not guaranteed to be atomic by the OS.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    file: File,
}

impl FileLock {
    /// Open `path` for locking.
    ///
    /// # Errors
    /// Returns [`Error::Unavailable`] if the file does not exist or is not
    /// read/writable.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| Error::Unavailable {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// The locked path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until an exclusive lock is held.
    ///
    /// # Errors
    /// Returns [`Error::Unavailable`] if the OS refuses the acquire.
    pub fn lock(&self) -> Result<()> {
        self.file.lock_exclusive().map_err(|source| Error::Unavailable {
            path: self.path.clone(),
            source,
        })
    }

    /// Block until a shared lock is held.
    ///
    /// # Errors
    /// Returns [`Error::Unavailable`] if the OS refuses the acquire.
    pub fn lock_sharable(&self) -> Result<()> {
        self.file.lock_shared().map_err(|source| Error::Unavailable {
            path: self.path.clone(),
            source,
        })
    }

    /// Attempt an exclusive lock without blocking.
    #[must_use]
    pub fn try_lock(&self) -> bool {
        self.file.try_lock_exclusive().is_ok()
    }

    /// Attempt a shared lock without blocking.
    #[must_use]
    pub fn try_lock_sharable(&self) -> bool {
        self.file.try_lock_shared().is_ok()
    }

    /// Attempt an exclusive lock until `deadline` is reached.
    #[must_use]
    pub fn timed_lock(&self, deadline: Instant) -> bool {
        self.poll(deadline, Self::try_lock)
    }

    /// Attempt a shared lock until `deadline` is reached.
    #[must_use]
    pub fn timed_lock_sharable(&self, deadline: Instant) -> bool {
        self.poll(deadline, Self::try_lock_sharable)
    }

    /// Release any held lock. Releasing an unheld lock is harmless.
    pub fn unlock(&self) {
        let _ = self.file.unlock();
    }

    fn poll(&self, deadline: Instant, attempt: impl Fn(&Self) -> bool) -> bool {
        loop {
            if attempt(self) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(LOCK_POLL_MS)));
        }
    }
}
