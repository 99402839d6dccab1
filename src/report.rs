//! Keepalive callback invoked while waiting to obtain a lock.
//!
//! One observer is installed process-wide; it sees every retry cycle of
//! every waiting acquisition and is the only mechanism to extend a timeout
//! mid-wait or to abort waiting.

use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::types::state::LockState;

/// Observer triggered between retry waits of [`IpMutex::lock`] and
/// [`IpMutex::lock_sharable`].
///
/// [`IpMutex::lock`]: crate::IpMutex::lock
/// [`IpMutex::lock_sharable`]: crate::IpMutex::lock_sharable
pub trait LockReport: Send + Sync {
    /// Keepalive trigger while waiting to obtain a lock.
    ///
    /// * `file` — the underlying mutex file
    /// * `target` — whether a shared or an exclusive lock is requested
    /// * `total` — seconds waited so far
    /// * `next` — seconds until the next callback; may be adjusted
    /// * `timeout` — the active timeout in seconds (`0` = none); may be
    ///   adjusted
    ///
    /// Return `true` to continue waiting, `false` to abort.
    fn wait_for_lock(
        &self,
        file: &Path,
        target: LockState,
        total: u64,
        next: &mut u64,
        timeout: &mut u64,
    ) -> bool {
        let _ = (file, target, total, next, timeout);
        true
    }
}

static REPORT: RwLock<Option<Arc<dyn LockReport>>> = RwLock::new(None);

/// Install the process-wide lock report, replacing any previous one.
pub fn set_lock_report(report: Arc<dyn LockReport>) {
    let mut slot = REPORT.write().unwrap_or_else(std::sync::PoisonError::into_inner);
    *slot = Some(report);
}

/// Remove the process-wide lock report; waits fall back to plain keepalive.
pub fn clear_lock_report() {
    let mut slot = REPORT.write().unwrap_or_else(std::sync::PoisonError::into_inner);
    *slot = None;
}

/// Dispatch one keepalive cycle to the installed report, if any.
///
/// The report is invoked outside the registry lock, so a callback may itself
/// install or clear a report.
pub(crate) fn wait_for_lock(
    file: &Path,
    target: LockState,
    total: u64,
    next: &mut u64,
    timeout: &mut u64,
) -> bool {
    let report = {
        let slot = REPORT.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        slot.clone()
    };
    match report {
        Some(r) => r.wait_for_lock(file, target, total, next, timeout),
        None => true,
    }
}
