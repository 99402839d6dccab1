//! Waiting acquisitions: keepalive callbacks, timeouts and aborts.
//!
//! These tests exercise real contended waits with the fixed 3 second
//! initial interval, so they take several seconds each. They mutate
//! process-global state (the installed report, `ZYPP_MAX_LOCK_WAIT`) and
//! therefore run serialized.

mod support;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serial_test::serial;

use lockyard::constants::MAX_LOCK_WAIT_ENV;
use lockyard::{
    clear_lock_report, set_lock_report, Error, IpMutex, LockReport, LockState,
};
use support::{lock_file, probe_exclusive, Holder};

/// Counts invocations and records the totals seen; continues waiting.
#[derive(Default)]
struct CountingReport {
    calls: AtomicU64,
    totals: Mutex<Vec<u64>>,
}

impl LockReport for CountingReport {
    fn wait_for_lock(
        &self,
        _file: &Path,
        _target: LockState,
        total: u64,
        _next: &mut u64,
        _timeout: &mut u64,
    ) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.totals.lock().unwrap().push(total);
        true
    }
}

/// Aborts the wait on the first callback.
struct AbortingReport;

impl LockReport for AbortingReport {
    fn wait_for_lock(
        &self,
        _file: &Path,
        _target: LockState,
        _total: u64,
        _next: &mut u64,
        _timeout: &mut u64,
    ) -> bool {
        false
    }
}

#[test]
#[serial]
fn keepalive_fires_until_the_holder_leaves() {
    let td = tempfile::tempdir().unwrap();
    let path = lock_file(&td);
    let mutex = IpMutex::new(&path).unwrap();

    let report = Arc::new(CountingReport::default());
    set_lock_report(report.clone());

    let holder = Holder::exclusive(&path);
    let release = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(6500));
        holder.release();
    });

    let t0 = Instant::now();
    mutex.lock().unwrap();
    clear_lock_report();
    release.join().unwrap();

    assert_eq!(mutex.state(), LockState::Exclusive);
    assert!(t0.elapsed() >= Duration::from_millis(6500));
    // Callbacks after the misses at ~3s and ~6s.
    assert!(report.calls.load(Ordering::SeqCst) >= 2);
    let totals = report.totals.lock().unwrap();
    assert_eq!(totals[0], 3);
    assert_eq!(totals[1], 6);
    mutex.unlock();
}

#[test]
#[serial]
fn contended_exclusive_wait_times_out() {
    let td = tempfile::tempdir().unwrap();
    let path = lock_file(&td);
    let mutex = IpMutex::new(&path).unwrap();

    std::env::set_var(MAX_LOCK_WAIT_ENV, "5");
    let holder = Holder::exclusive(&path);

    let t0 = Instant::now();
    let err = mutex.lock().unwrap_err();
    let elapsed = t0.elapsed();
    std::env::remove_var(MAX_LOCK_WAIT_ENV);

    match &err {
        Error::Timeout(stats) => {
            assert!(stats.timed_out());
            assert!(!stats.aborted());
            assert!(stats.total >= 5);
            assert_eq!(stats.timeout, 5);
            assert_eq!(stats.target, LockState::Exclusive);
            assert_eq!(stats.path, path);
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
    // Raised within one retry interval past the timeout.
    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed < Duration::from_secs(9));
    assert_eq!(mutex.state(), LockState::Unlocked);
    holder.release();
}

#[test]
#[serial]
fn observer_abort_after_a_dropped_shared_lock_leaves_unlocked() {
    let td = tempfile::tempdir().unwrap();
    let path = lock_file(&td);
    let mutex = IpMutex::new(&path).unwrap();

    set_lock_report(Arc::new(AbortingReport));

    // Hold shared ourselves; a rival sharer blocks the upgrade.
    assert!(mutex.try_lock_sharable().unwrap());
    let rival = Holder::shared(&path);

    let err = mutex.lock().unwrap_err();
    clear_lock_report();

    match &err {
        Error::Aborted(stats) => {
            assert!(stats.aborted());
            assert!(!stats.timed_out());
            assert_eq!(stats.target, LockState::Exclusive);
        }
        other => panic!("expected an abort, got {other:?}"),
    }
    // The held shared lock was dropped to avoid an upgrade deadlock and
    // must not resurface after the abort.
    assert_eq!(mutex.state(), LockState::Unlocked);
    rival.release();
    assert!(probe_exclusive(&path));
}

#[test]
#[serial]
fn non_waiting_ops_stay_prompt_while_a_clone_waits() {
    let td = tempfile::tempdir().unwrap();
    let path = lock_file(&td);
    let mutex = IpMutex::new(&path).unwrap();

    let holder = Holder::exclusive(&path);
    let waiter = mutex.clone();
    let waiting = std::thread::spawn(move || waiter.lock());

    // Let the clone settle into its retry loop before probing.
    std::thread::sleep(Duration::from_millis(500));

    let t0 = Instant::now();
    assert!(!mutex.try_lock().unwrap());
    assert!(!mutex.try_lock_sharable().unwrap());
    assert_eq!(mutex.state(), LockState::Unlocked);
    assert!(mutex.mutex_file().is_some());
    mutex.unlock();
    assert!(
        t0.elapsed() < Duration::from_millis(500),
        "non-waiting operations must not block behind a waiting clone"
    );

    holder.release();
    waiting.join().unwrap().unwrap();
    assert_eq!(mutex.state(), LockState::Exclusive);
    mutex.unlock();
}

#[test]
#[serial]
fn observer_may_shorten_the_timeout() {
    let td = tempfile::tempdir().unwrap();
    let path = lock_file(&td);
    let mutex = IpMutex::new(&path).unwrap();

    struct ShorteningReport;
    impl LockReport for ShorteningReport {
        fn wait_for_lock(
            &self,
            _file: &Path,
            _target: LockState,
            _total: u64,
            next: &mut u64,
            timeout: &mut u64,
        ) -> bool {
            *next = 1;
            *timeout = 4;
            true
        }
    }
    set_lock_report(Arc::new(ShorteningReport));

    let holder = Holder::exclusive(&path);
    let err = mutex.lock_sharable().unwrap_err();
    clear_lock_report();

    match &err {
        Error::Timeout(stats) => {
            assert_eq!(stats.timeout, 4);
            assert_eq!(stats.target, LockState::Shared);
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
    assert_eq!(mutex.state(), LockState::Unlocked);
    holder.release();
}
