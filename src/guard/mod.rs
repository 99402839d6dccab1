//! Scoped acquisition of an [`IpMutex`] at a shared or exclusive target.
//!
//! Unlike a plain scope guard, dropping a [`Guard`] does not
//! unconditionally unlock the mutex: guards hold counted references to the
//! lock state, and the mutex transitions once the last reference of a kind
//! is gone. A [`SharedGuard`] is also satisfied by a mutex in exclusive
//! state; once all exclusive references are gone, the mutex falls back to
//! shared or unlocked depending on whether shared references remain.
//!
//! ```no_run
//! use lockyard::{ExclusiveGuard, IpMutex, SharedGuard};
//!
//! let mutex = IpMutex::new("/var/run/lockyard/common.lock")?;
//! {
//!     let _shared = SharedGuard::new(&mutex)?;
//!     // state: shared
//!     {
//!         let _excl = ExclusiveGuard::new(&mutex)?;
//!         // state: exclusive
//!     }
//!     // state: back to shared, the outer reference is still alive
//! }
//! // state: unlocked
//! # Ok::<(), lockyard::Error>(())
//! ```
//!
//! Best-effort acquisition leaves the guard constructed but not owning:
//!
//! ```no_run
//! # use lockyard::{IpMutex, SharedGuard};
//! # let mutex = IpMutex::new("/var/run/lockyard/common.lock")?;
//! let guard = SharedGuard::try_new(&mutex)?;
//! if guard.owns() {
//!     // obtained a shared lock
//! }
//! # Ok::<(), lockyard::Error>(())
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::time::Instant;

use crate::mutex::{deadline_in, IpMutex, StateRef};
use crate::types::errors::Result;
use crate::types::state::LockState;

mod sealed {
    pub trait Sealed {}
}

/// The lock state a guard drives the mutex to; implemented by [`Shared`]
/// and [`Exclusive`].
pub trait Target: sealed::Sealed {
    /// The state this guard enforces.
    const STATE: LockState;

    #[doc(hidden)]
    fn lock(mutex: &IpMutex) -> Result<()>;
    #[doc(hidden)]
    fn sleep_lock(mutex: &IpMutex) -> Result<()>;
    #[doc(hidden)]
    fn try_lock(mutex: &IpMutex) -> Result<bool>;
    #[doc(hidden)]
    fn timed_lock(mutex: &IpMutex, deadline: Instant) -> Result<bool>;
}

/// Marker selecting the sharable locking operations.
#[derive(Debug)]
pub enum Shared {}

/// Marker selecting the exclusive locking operations.
#[derive(Debug)]
pub enum Exclusive {}

impl sealed::Sealed for Shared {}
impl sealed::Sealed for Exclusive {}

impl Target for Shared {
    const STATE: LockState = LockState::Shared;

    fn lock(mutex: &IpMutex) -> Result<()> {
        mutex.lock_sharable()
    }
    fn sleep_lock(mutex: &IpMutex) -> Result<()> {
        mutex.sleep_lock_sharable()
    }
    fn try_lock(mutex: &IpMutex) -> Result<bool> {
        mutex.try_lock_sharable()
    }
    fn timed_lock(mutex: &IpMutex, deadline: Instant) -> Result<bool> {
        mutex.timed_lock_sharable(deadline)
    }
}

impl Target for Exclusive {
    const STATE: LockState = LockState::Exclusive;

    fn lock(mutex: &IpMutex) -> Result<()> {
        mutex.lock()
    }
    fn sleep_lock(mutex: &IpMutex) -> Result<()> {
        mutex.sleep_lock()
    }
    fn try_lock(mutex: &IpMutex) -> Result<bool> {
        mutex.try_lock()
    }
    fn timed_lock(mutex: &IpMutex, deadline: Instant) -> Result<bool> {
        mutex.timed_lock(deadline)
    }
}

/// Acquire and automatically release a lock on an [`IpMutex`].
///
/// A guard is *owning* while it holds a reference to its target state;
/// dropping it (or calling [`unlock`](Self::unlock)) drops the reference,
/// which releases or demotes the mutex once it was the last one of its
/// kind. Releasing never fails and happens on every exit path.
pub struct Guard<T: Target> {
    mutex: IpMutex,
    state_ref: StateRef,
    _target: PhantomData<T>,
}

/// Acquire and automatically release a sharable lock.
pub type SharedGuard = Guard<Shared>;

/// Acquire and automatically release an exclusive lock.
pub type ExclusiveGuard = Guard<Exclusive>;

impl<T: Target> Guard<T> {
    /// Acquire the target lock now, waiting with keepalive if contended.
    ///
    /// # Errors
    /// [`Error::Timeout`], [`Error::Aborted`] or [`Error::Unusable`].
    ///
    /// [`Error::Timeout`]: crate::Error::Timeout
    /// [`Error::Aborted`]: crate::Error::Aborted
    /// [`Error::Unusable`]: crate::Error::Unusable
    pub fn new(mutex: &IpMutex) -> Result<Self> {
        let mut guard = Self::deferred(mutex);
        guard.lock()?;
        Ok(guard)
    }

    /// Construct without acquiring; call [`lock`](Self::lock) later.
    #[must_use]
    pub fn deferred(mutex: &IpMutex) -> Self {
        Self {
            mutex: mutex.clone(),
            state_ref: StateRef::none(),
            _target: PhantomData,
        }
    }

    /// Try to acquire the target lock without waiting; check
    /// [`owns`](Self::owns) for the outcome.
    ///
    /// # Errors
    /// [`Error::Unusable`] on a placeholder mutex.
    ///
    /// [`Error::Unusable`]: crate::Error::Unusable
    pub fn try_new(mutex: &IpMutex) -> Result<Self> {
        let mut guard = Self::deferred(mutex);
        guard.try_lock()?;
        Ok(guard)
    }

    /// Try to acquire the target lock before `deadline`; check
    /// [`owns`](Self::owns) for the outcome.
    ///
    /// # Errors
    /// [`Error::Unusable`] on a placeholder mutex.
    ///
    /// [`Error::Unusable`]: crate::Error::Unusable
    pub fn timed(mutex: &IpMutex, deadline: Instant) -> Result<Self> {
        let mut guard = Self::deferred(mutex);
        guard.timed_lock(deadline)?;
        Ok(guard)
    }

    /// Try to acquire the target lock within `secs` seconds; check
    /// [`owns`](Self::owns) for the outcome.
    ///
    /// # Errors
    /// [`Error::Unusable`] on a placeholder mutex.
    ///
    /// [`Error::Unusable`]: crate::Error::Unusable
    pub fn wait_new(mutex: &IpMutex, secs: u64) -> Result<Self> {
        Self::timed(mutex, deadline_in(secs))
    }

    /// Acquire the target lock, waiting with keepalive if contended. A
    /// state change is requested only if the mutex is below the target.
    ///
    /// # Errors
    /// [`Error::Timeout`], [`Error::Aborted`] or [`Error::Unusable`].
    ///
    /// [`Error::Timeout`]: crate::Error::Timeout
    /// [`Error::Aborted`]: crate::Error::Aborted
    /// [`Error::Unusable`]: crate::Error::Unusable
    pub fn lock(&mut self) -> Result<()> {
        if self.need_state_change() {
            T::lock(&self.mutex)?;
        }
        self.take_ref()
    }

    /// Acquire the target lock, blocking indefinitely without callbacks.
    ///
    /// # Errors
    /// [`Error::Unusable`] on a placeholder mutex.
    ///
    /// [`Error::Unusable`]: crate::Error::Unusable
    pub fn sleep_lock(&mut self) -> Result<()> {
        if self.need_state_change() {
            T::sleep_lock(&self.mutex)?;
        }
        self.take_ref()
    }

    /// Try to acquire the target lock without waiting. On failure any held
    /// reference is dropped and `false` is returned.
    ///
    /// # Errors
    /// [`Error::Unusable`] on a placeholder mutex.
    ///
    /// [`Error::Unusable`]: crate::Error::Unusable
    pub fn try_lock(&mut self) -> Result<bool> {
        if self.need_state_change() {
            match T::try_lock(&self.mutex) {
                Ok(true) => {}
                Ok(false) => {
                    self.state_ref = StateRef::none();
                    return Ok(false);
                }
                Err(err) => {
                    self.state_ref = StateRef::none();
                    return Err(err);
                }
            }
        }
        self.take_ref()?;
        Ok(true)
    }

    /// Try to acquire the target lock before `deadline`. On failure any
    /// held reference is dropped and `false` is returned.
    ///
    /// # Errors
    /// [`Error::Unusable`] on a placeholder mutex.
    ///
    /// [`Error::Unusable`]: crate::Error::Unusable
    pub fn timed_lock(&mut self, deadline: Instant) -> Result<bool> {
        if self.need_state_change() {
            match T::timed_lock(&self.mutex, deadline) {
                Ok(true) => {}
                Ok(false) => {
                    self.state_ref = StateRef::none();
                    return Ok(false);
                }
                Err(err) => {
                    self.state_ref = StateRef::none();
                    return Err(err);
                }
            }
        }
        self.take_ref()?;
        Ok(true)
    }

    /// Try to acquire the target lock within `secs` seconds.
    ///
    /// # Errors
    /// [`Error::Unusable`] on a placeholder mutex.
    ///
    /// [`Error::Unusable`]: crate::Error::Unusable
    pub fn wait_lock(&mut self, secs: u64) -> Result<bool> {
        self.timed_lock(deadline_in(secs))
    }

    /// Drop this guard's state reference. The mutex itself only changes
    /// state once the last reference of its kind is gone.
    pub fn unlock(&mut self) {
        self.state_ref = StateRef::none();
    }

    /// Whether we hold a lock.
    #[must_use]
    pub fn owns(&self) -> bool {
        self.state_ref.is_held()
    }

    /// Access to the underlying mutex.
    #[must_use]
    pub fn mutex(&self) -> &IpMutex {
        &self.mutex
    }

    fn need_state_change(&self) -> bool {
        self.mutex.state() < T::STATE
    }

    fn take_ref(&mut self) -> Result<()> {
        if !self.state_ref.is_held() {
            self.state_ref = self.mutex.state_ref(T::STATE)?;
        }
        Ok(())
    }
}

impl<T: Target> Default for Guard<T> {
    fn default() -> Self {
        Self::deferred(&IpMutex::default())
    }
}

impl<T: Target> fmt::Debug for Guard<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guard")
            .field("target", &T::STATE)
            .field("owns", &self.owns())
            .field("mutex", &self.mutex)
            .finish()
    }
}

impl<T: Target> fmt::Display for Guard<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let held = if self.owns() {
            T::STATE
        } else {
            LockState::Unlocked
        };
        write!(f, "[{} {}]", held, self.mutex)
    }
}
