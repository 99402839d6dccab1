//! The common mutex at its well-known location.

use std::env;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use crate::constants::{DEFAULT_LOCK_DIR, DEFAULT_LOCK_NAME, LOCKFILE_ROOT_ENV};
use crate::fs::lockfile::usable_lock_file;
use crate::mutex::IpMutex;
use crate::types::errors::Result;

/// Common inter-process mutex.
///
/// The underlying mutex files are created in `var/run/lockyard` below the
/// directory specified as system root; the common mutex file name is
/// `common.lock`. When no system root is given, `ZYPP_LOCKFILE_ROOT` is
/// consulted before assuming `/`.
///
/// Locking for users without read/write access to the mutex file is faked,
/// so unprivileged use degrades gracefully instead of failing.
#[derive(Clone, Debug)]
pub struct CommonLock {
    mutex: IpMutex,
}

impl CommonLock {
    /// Common mutex to synchronize filesystem access (guess the system
    /// root).
    ///
    /// # Errors
    /// [`Error::Unavailable`] if the lock file exists but cannot be opened.
    ///
    /// [`Error::Unavailable`]: crate::Error::Unavailable
    pub fn new() -> Result<Self> {
        Self::create(&env_sysroot(), DEFAULT_LOCK_NAME)
    }

    /// Special purpose mutex (or the common one if `name` is empty; guess
    /// the system root).
    ///
    /// # Errors
    /// [`Error::Unavailable`] if the lock file exists but cannot be opened.
    ///
    /// [`Error::Unavailable`]: crate::Error::Unavailable
    pub fn named(name: &str) -> Result<Self> {
        Self::create(&env_sysroot(), name)
    }

    /// Common mutex for a system rooted at `sysroot`.
    ///
    /// # Errors
    /// [`Error::Unavailable`] if the lock file exists but cannot be opened.
    ///
    /// [`Error::Unavailable`]: crate::Error::Unavailable
    pub fn rooted(sysroot: &Path) -> Result<Self> {
        Self::create(sysroot, DEFAULT_LOCK_NAME)
    }

    /// Special purpose mutex for a system rooted at `sysroot` (the common
    /// one if `name` is empty).
    ///
    /// # Errors
    /// [`Error::Unavailable`] if the lock file exists but cannot be opened.
    ///
    /// [`Error::Unavailable`]: crate::Error::Unavailable
    pub fn rooted_named(sysroot: &Path, name: &str) -> Result<Self> {
        Self::create(sysroot, name)
    }

    /// Use a caller-supplied mutex file. In contrast to the constructors
    /// the file is not created; it must exist.
    ///
    /// # Errors
    /// [`Error::Unavailable`] if the caller is privileged and the file
    /// cannot be opened. Unprivileged callers fall back to fake locking.
    ///
    /// [`Error::Unavailable`]: crate::Error::Unavailable
    pub fn use_path(path: &Path) -> Result<Self> {
        Ok(Self {
            mutex: IpMutex::new(usable_lock_file(path, false))?,
        })
    }

    /// A handle to the underlying mutex.
    #[must_use]
    pub fn mutex(&self) -> IpMutex {
        self.mutex.clone()
    }

    fn create(sysroot: &Path, name: &str) -> Result<Self> {
        let name = if name.is_empty() { DEFAULT_LOCK_NAME } else { name };
        let path = sysroot.join(DEFAULT_LOCK_DIR).join(name);
        Ok(Self {
            mutex: IpMutex::new(usable_lock_file(&path, true))?,
        })
    }
}

impl Deref for CommonLock {
    type Target = IpMutex;

    fn deref(&self) -> &IpMutex {
        &self.mutex
    }
}

fn env_sysroot() -> PathBuf {
    env::var_os(LOCKFILE_ROOT_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::FAKE_LOCK_PATH;
    use crate::types::state::LockState;

    #[test]
    fn rooted_creates_the_common_lock_file() {
        let td = tempfile::tempdir().unwrap();
        let common = CommonLock::rooted(td.path()).unwrap();
        let expected = td.path().join(DEFAULT_LOCK_DIR).join(DEFAULT_LOCK_NAME);
        assert!(expected.exists());
        assert!(!common.is_fake());
        assert_eq!(common.mutex_file(), Some(expected));
    }

    #[test]
    fn rooted_named_uses_the_given_basename() {
        let td = tempfile::tempdir().unwrap();
        let common = CommonLock::rooted_named(td.path(), "history.lock").unwrap();
        let expected = td.path().join(DEFAULT_LOCK_DIR).join("history.lock");
        assert!(expected.exists());
        assert_eq!(common.mutex_file(), Some(expected));
    }

    #[test]
    fn empty_name_falls_back_to_the_common_name() {
        let td = tempfile::tempdir().unwrap();
        let common = CommonLock::rooted_named(td.path(), "").unwrap();
        let expected = td.path().join(DEFAULT_LOCK_DIR).join(DEFAULT_LOCK_NAME);
        assert_eq!(common.mutex_file(), Some(expected));
    }

    #[test]
    fn use_path_takes_an_existing_file() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("custom.lock");
        std::fs::write(&path, b"").unwrap();
        let common = CommonLock::use_path(&path).unwrap();
        assert!(!common.is_fake());
        assert_eq!(common.mutex_file(), Some(path));
    }

    #[test]
    fn use_path_never_creates() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("absent.lock");
        let result = CommonLock::use_path(&path);
        if rustix::process::geteuid().is_root() {
            // Root keeps the real path and surfaces the open failure.
            assert!(result.is_err());
        } else {
            // Unprivileged use degrades to fake locking.
            let common = result.unwrap();
            assert!(common.is_fake());
            assert_eq!(
                common.mutex_file(),
                Some(PathBuf::from(FAKE_LOCK_PATH))
            );
        }
        assert!(!path.exists());
    }

    #[test]
    fn common_lock_drives_the_mutex() {
        let td = tempfile::tempdir().unwrap();
        let common = CommonLock::rooted(td.path()).unwrap();
        assert!(common.try_lock().unwrap());
        assert_eq!(common.state(), LockState::Exclusive);
        common.unlock();
        assert_eq!(common.state(), LockState::Unlocked);
    }
}
