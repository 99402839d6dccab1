//! The inter-process mutex: state machine, wait protocol and registry.

mod refs;
mod registry;

pub(crate) use refs::StateRef;

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::constants::{
    DEFAULT_MAX_LOCK_WAIT_SECS, FAKE_LOCK_PATH, INITIAL_LOCK_WAIT_SECS, LOCK_POLL_MS,
    MAX_LOCK_WAIT_ENV,
};
use crate::fs::FileLock;
use crate::report;
use crate::types::errors::{Error, Result, WaitStats};
use crate::types::state::LockState;

/// Absolute deadline `secs` seconds from now, for the `timed_*` operations.
#[must_use]
pub fn deadline_in(secs: u64) -> Instant {
    Instant::now() + Duration::from_secs(secs)
}

/// Maximum time in seconds to wait for a contended lock. Re-read from the
/// environment at each wait so long-lived processes observe changes.
fn max_lock_wait() -> u64 {
    env::var(MAX_LOCK_WAIT_ENV)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(DEFAULT_MAX_LOCK_WAIT_SECS)
}

/// Mutex state and bookkeeping, shared by all handles for one path.
///
/// Every method here is non-blocking and runs under the handle mutex for a
/// short critical section only. The waiting operations live on [`IpMutex`]
/// and sleep *between* attempts, never while holding this state, so
/// `try_*`, `unlock*` and the accessors on other handles stay prompt while
/// someone waits.
#[derive(Debug)]
pub(crate) struct Inner {
    pub(crate) path: PathBuf,
    /// `None` means locking is faked: state transitions happen, OS calls
    /// do not.
    lock_file: Option<FileLock>,
    pub(crate) state: LockState,
    /// References held by shared guards.
    pub(crate) shared_refs: Weak<refs::StateToken>,
    /// References held by exclusive guards.
    pub(crate) exclusive_refs: Weak<refs::StateToken>,
}

impl Inner {
    fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            lock_file: Some(FileLock::open(path)?),
            state: LockState::Unlocked,
            shared_refs: Weak::new(),
            exclusive_refs: Weak::new(),
        })
    }

    fn fake() -> Self {
        Self {
            path: PathBuf::from(FAKE_LOCK_PATH),
            lock_file: None,
            state: LockState::Unlocked,
            shared_refs: Weak::new(),
            exclusive_refs: Weak::new(),
        }
    }

    fn is_fake(&self) -> bool {
        self.lock_file.is_none()
    }

    pub(crate) fn dump(&self) -> String {
        format!(
            "[{}({},{}) {}]",
            self.state,
            self.shared_refs.strong_count(),
            self.exclusive_refs.strong_count(),
            self.path.display()
        )
    }

    fn try_lock(&mut self) -> bool {
        if self.state == LockState::Exclusive {
            return true;
        }
        if self.lock_file.as_ref().map_or(true, FileLock::try_lock) {
            self.state = LockState::Exclusive;
            return true;
        }
        false
    }

    fn try_lock_sharable(&mut self) -> bool {
        if self.state >= LockState::Shared {
            return true;
        }
        if self
            .lock_file
            .as_ref()
            .map_or(true, FileLock::try_lock_sharable)
        {
            self.state = LockState::Shared;
            return true;
        }
        false
    }

    fn try_target(&mut self, target: LockState) -> bool {
        match target {
            LockState::Exclusive => self.try_lock(),
            LockState::Shared => self.try_lock_sharable(),
            LockState::Unlocked => true,
        }
    }

    pub(crate) fn unlock(&mut self) {
        if self.state != LockState::Unlocked {
            if let Some(file) = &self.lock_file {
                file.unlock();
            }
            self.state = LockState::Unlocked;
        }
    }

    pub(crate) fn unlock_sharable(&mut self) {
        self.unlock();
    }

    /// Downgrade a held exclusive lock to shared; release-hook use only.
    ///
    /// The shared re-acquire on the fd holding the exclusive lock is an
    /// instant conversion. Should it fail regardless, the lock is released
    /// and the state reset so the next acquire recovers.
    pub(crate) fn demote_to_shared(&mut self) {
        match &self.lock_file {
            None => self.state = LockState::Shared,
            Some(file) => {
                if file.try_lock_sharable() {
                    self.state = LockState::Shared;
                } else {
                    error!(
                        "failed to downgrade {} to a shared lock; releasing",
                        self.path.display()
                    );
                    file.unlock();
                    self.state = LockState::Unlocked;
                }
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if !self.is_fake() {
            debug!("dropping mutex for {}", self.path.display());
            registry::forget(&self.path);
        }
    }
}

fn lock_inner(handle: &Arc<Mutex<Inner>>) -> MutexGuard<'_, Inner> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mutex to synchronize filesystem access across different processes (not
/// threads!).
///
/// The mutex is backed by an advisory lock on an existing file and is
/// created per path on demand: constructing an `IpMutex` for a path that is
/// live in this process returns a handle to the same instance. Handles are
/// cheap to clone and may be used from several threads; only the waiting
/// operations suspend, and they never hold the shared state across a
/// retry sleep, so `try_*`, `unlock*` and the accessors on other handles
/// return promptly while a clone is waiting.
///
/// The mutex is **not** upgradable. Switching from [`LockState::Shared`] to
/// [`LockState::Exclusive`] is not atomic; a blocking [`lock`](Self::lock)
/// may unlock first in order to avoid a deadlock, so callers must not
/// assume a previously held shared lock survives an upgrade attempt.
///
/// While waiting in [`lock`](Self::lock) or
/// [`lock_sharable`](Self::lock_sharable), the installed [`LockReport`]
/// is triggered regularly (every 3 seconds). If the lock cannot be obtained
/// within 180 seconds, or the callback aborts waiting, an error is
/// returned. `ZYPP_MAX_LOCK_WAIT` adjusts the maximum waiting time; set it
/// to `0` to wait forever.
///
/// A default-constructed `IpMutex` is a placeholder: every acquire fails
/// with [`Error::Unusable`].
///
/// [`LockReport`]: crate::report::LockReport
#[derive(Clone, Debug, Default)]
pub struct IpMutex {
    inner: Option<Arc<Mutex<Inner>>>,
}

impl IpMutex {
    /// Construct the mutex for `path`, reusing the live instance if this
    /// process already holds one.
    ///
    /// Passing [`fake_lock_path`](Self::fake_lock_path) yields an
    /// independent fake mutex instead.
    ///
    /// # Errors
    /// Returns [`Error::Unavailable`] if `path` does not exist or is not
    /// read/writable.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path == Self::fake_lock_path() {
            return Ok(Self::fake());
        }
        Ok(Self {
            inner: Some(registry::acquire(path)?),
        })
    }

    /// A fake mutex: all state transitions happen, no OS locking occurs.
    /// Every call constructs an independent instance.
    #[must_use]
    pub fn fake() -> Self {
        Self {
            inner: Some(Arc::new(Mutex::new(Inner::fake()))),
        }
    }

    /// The virtual pathname selecting fake locking, `"/<fakelock>"`.
    #[must_use]
    pub fn fake_lock_path() -> &'static Path {
        Path::new(FAKE_LOCK_PATH)
    }

    /// Whether an underlying mutex is available (i.e. not default
    /// constructed).
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.inner.is_some()
    }

    /// Whether locking is faked.
    #[must_use]
    pub fn is_fake(&self) -> bool {
        matches!(&self.inner, Some(handle) if lock_inner(handle).is_fake())
    }

    /// The current mutex state.
    #[must_use]
    pub fn state(&self) -> LockState {
        match &self.inner {
            Some(handle) => lock_inner(handle).state,
            None => LockState::Unlocked,
        }
    }

    /// The underlying mutex file; `None` for a placeholder.
    #[must_use]
    pub fn mutex_file(&self) -> Option<PathBuf> {
        self.inner.as_ref().map(|handle| lock_inner(handle).path.clone())
    }

    fn inner(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner.as_ref().map(lock_inner).ok_or(Error::Unusable)
    }

    /// One non-blocking acquire attempt under a short critical section.
    fn try_target(&self, target: LockState) -> Result<bool> {
        Ok(self.inner()?.try_target(target))
    }

    /// Poll for `target` until `deadline` (or forever when `None`). Sleeps
    /// between attempts without holding the shared state, so other handles
    /// stay responsive.
    fn poll_target(&self, target: LockState, deadline: Option<Instant>) -> Result<bool> {
        loop {
            if self.try_target(target)? {
                return Ok(true);
            }
            let poll = Duration::from_millis(LOCK_POLL_MS);
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    thread::sleep((deadline - now).min(poll));
                }
                None => thread::sleep(poll),
            }
        }
    }

    /// Wait for `target`, triggering the keepalive report between retries.
    ///
    /// An exclusive acquire that blocks while a lock is held releases it
    /// first: the upgrade is not atomic, and holding on to the shared lock
    /// could deadlock against another upgrading process.
    fn lock_wait(&self, target: LockState) -> Result<()> {
        if self.poll_target(target, Some(deadline_in(INITIAL_LOCK_WAIT_SECS)))? {
            return Ok(());
        }
        let path = {
            let mut inner = self.inner()?;
            if target == LockState::Exclusive && inner.state != LockState::Unlocked {
                info!(
                    "dropping {} lock to avoid an upgrade deadlock; {}",
                    inner.state,
                    inner.dump()
                );
                inner.unlock();
            }
            inner.path.clone()
        };

        let mut total: u64 = 0;
        let mut next = INITIAL_LOCK_WAIT_SECS;
        let mut timeout = max_lock_wait();
        warn!(
            "no {} lock within {}s; keep waiting (timeout {}s); {}",
            target, next, timeout, self
        );
        loop {
            total += next;
            if timeout != 0 && total >= timeout {
                error!(
                    "no {} lock within {}/{}s; giving up; {}",
                    target, total, timeout, self
                );
                return Err(Error::Timeout(WaitStats {
                    path,
                    target,
                    total,
                    timeout,
                }));
            }
            if !report::wait_for_lock(&path, target, total, &mut next, &mut timeout) {
                error!(
                    "no {} lock within {}/{}s; abort requested; {}",
                    target, total, timeout, self
                );
                return Err(Error::Aborted(WaitStats {
                    path,
                    target,
                    total,
                    timeout,
                }));
            }
            if self.poll_target(target, Some(deadline_in(next)))? {
                info!(
                    "obtained {} lock after {}/{}s; {}",
                    target,
                    total + next,
                    timeout,
                    self
                );
                return Ok(());
            }
        }
    }

    /// Wait until an exclusive lock is obtained, triggering the keepalive
    /// report while waiting.
    ///
    /// # Errors
    /// [`Error::Timeout`] or [`Error::Aborted`]; the mutex is left
    /// [`LockState::Unlocked`] then. [`Error::Unusable`] on a placeholder.
    pub fn lock(&self) -> Result<()> {
        self.lock_wait(LockState::Exclusive)
    }

    /// Wait until an exclusive lock is obtained; no callback or timeout.
    ///
    /// # Errors
    /// [`Error::Unusable`] on a placeholder.
    pub fn sleep_lock(&self) -> Result<()> {
        self.poll_target(LockState::Exclusive, None)?;
        Ok(())
    }

    /// Try to obtain an exclusive lock immediately (do not wait).
    ///
    /// # Errors
    /// [`Error::Unusable`] on a placeholder.
    pub fn try_lock(&self) -> Result<bool> {
        self.try_target(LockState::Exclusive)
    }

    /// Try to obtain an exclusive lock before `deadline` is reached.
    ///
    /// # Errors
    /// [`Error::Unusable`] on a placeholder.
    pub fn timed_lock(&self, deadline: Instant) -> Result<bool> {
        self.poll_target(LockState::Exclusive, Some(deadline))
    }

    /// Try to obtain an exclusive lock within `secs` seconds.
    ///
    /// # Errors
    /// [`Error::Unusable`] on a placeholder.
    pub fn wait_lock(&self, secs: u64) -> Result<bool> {
        self.timed_lock(deadline_in(secs))
    }

    /// Release the lock, leaving the mutex unlocked no matter how often it
    /// was locked before. Outstanding guard references are overridden (their
    /// release becomes a no-op). Safe to call repeatedly.
    pub fn unlock(&self) {
        if let Some(handle) = &self.inner {
            lock_inner(handle).unlock();
        }
    }

    /// Wait until a shared lock is obtained, triggering the keepalive
    /// report while waiting. A no-op success if a shared or exclusive lock
    /// is already held.
    ///
    /// # Errors
    /// [`Error::Timeout`] or [`Error::Aborted`]; [`Error::Unusable`] on a
    /// placeholder.
    pub fn lock_sharable(&self) -> Result<()> {
        self.lock_wait(LockState::Shared)
    }

    /// Wait until a shared lock is obtained; no callback or timeout. A
    /// no-op success if a shared or exclusive lock is already held.
    ///
    /// # Errors
    /// [`Error::Unusable`] on a placeholder.
    pub fn sleep_lock_sharable(&self) -> Result<()> {
        self.poll_target(LockState::Shared, None)?;
        Ok(())
    }

    /// Try to obtain a shared lock immediately (do not wait). A no-op
    /// success if a shared or exclusive lock is already held.
    ///
    /// # Errors
    /// [`Error::Unusable`] on a placeholder.
    pub fn try_lock_sharable(&self) -> Result<bool> {
        self.try_target(LockState::Shared)
    }

    /// Try to obtain a shared lock before `deadline` is reached.
    ///
    /// # Errors
    /// [`Error::Unusable`] on a placeholder.
    pub fn timed_lock_sharable(&self, deadline: Instant) -> Result<bool> {
        self.poll_target(LockState::Shared, Some(deadline))
    }

    /// Try to obtain a shared lock within `secs` seconds.
    ///
    /// # Errors
    /// [`Error::Unusable`] on a placeholder.
    pub fn wait_lock_sharable(&self, secs: u64) -> Result<bool> {
        self.timed_lock_sharable(deadline_in(secs))
    }

    /// Equivalent to [`unlock`](Self::unlock).
    pub fn unlock_sharable(&self) {
        if let Some(handle) = &self.inner {
            lock_inner(handle).unlock_sharable();
        }
    }

    /// Obtain a guard reference to `target`, shared with all other guards
    /// holding the same target on this mutex.
    pub(crate) fn state_ref(&self, target: LockState) -> Result<StateRef> {
        let handle = self.inner.as_ref().ok_or(Error::Unusable)?;
        Ok(refs::acquire_ref(handle, target))
    }
}

impl fmt::Display for IpMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(handle) => f.write_str(&lock_inner(handle).dump()),
            None => f.write_str("[no mutex]"),
        }
    }
}
