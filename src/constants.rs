//! Shared crate-wide constants for Lockyard.
//!
//! Centralizes magic values used across modules. Adjusting these here will
//! propagate through the crate.

/// Virtual pathname indicating that mutex operation must be faked (no OS
/// locking at all). See `IpMutex::fake_lock_path()`.
pub const FAKE_LOCK_PATH: &str = "/<fakelock>";

/// Seconds covered by the first acquisition attempt before the wait loop
/// (and its keepalive callbacks) starts.
pub const INITIAL_LOCK_WAIT_SECS: u64 = 3;

/// Default upper bound in seconds for a waiting acquisition. Overridable at
/// runtime via `ZYPP_MAX_LOCK_WAIT`; `0` disables the timeout.
pub const DEFAULT_MAX_LOCK_WAIT_SECS: u64 = 180;

/// Environment variable adjusting the maximum time waiting for a lock.
pub const MAX_LOCK_WAIT_ENV: &str = "ZYPP_MAX_LOCK_WAIT";

/// Environment variable naming an alternative system root for the common
/// lock file, consulted only when the caller supplies no sysroot.
pub const LOCKFILE_ROOT_ENV: &str = "ZYPP_LOCKFILE_ROOT";

/// Poll interval in milliseconds for the timed advisory-lock attempts (see
/// `fs/flock.rs`).
pub const LOCK_POLL_MS: u64 = 25;

/// Directory below the system root holding well-known lock files.
pub const DEFAULT_LOCK_DIR: &str = "var/run/lockyard";

/// Basename of the common lock file.
pub const DEFAULT_LOCK_NAME: &str = "common.lock";
