#![forbid(unsafe_code)]
//! Lockyard: reference-counted inter-process file locking.
//!
//! A mutex to synchronize filesystem access across different processes (not
//! threads!) cooperating on shared system state, e.g. a package database.
//! The mutex is backed by an advisory lock on an ordinary file and tracks
//! one of three states: unlocked, shared or exclusive.
//!
//! Model highlights:
//! - One live [`IpMutex`] per path and process: constructing a mutex for a
//!   path that is already in use returns a handle to the same instance, so
//!   nested and sibling acquisitions compose via reference counting.
//! - Scoped [`SharedGuard`]/[`ExclusiveGuard`] acquisitions release on every
//!   exit path; the last reference of a kind demotes or releases the mutex.
//! - The mutex is **not** upgradable: switching from a shared to an
//!   exclusive lock is not atomic and may unlock first to avoid a
//!   cross-process deadlock.
//! - While waiting for a contended lock, a process-wide [`LockReport`]
//!   callback is triggered regularly (every 3 seconds by default) and may
//!   extend or abort the wait. `ZYPP_MAX_LOCK_WAIT` adjusts the maximum
//!   waiting time (`0` waits forever).
//! - This crate forbids `unsafe` and uses `rustix` for syscalls.

pub mod common;
pub mod constants;
pub mod fs;
pub mod guard;
pub mod mutex;
pub mod report;
pub mod types;

pub use common::CommonLock;
pub use guard::{ExclusiveGuard, Guard, SharedGuard};
pub use mutex::{deadline_in, IpMutex};
pub use report::{clear_lock_report, set_lock_report, LockReport};
pub use types::errors::{Error, Result, WaitStats};
pub use types::state::LockState;
