// Shared helpers for the integration tests. External lock visibility is
// probed on an independent file description, which contends with the
// crate's own handle even within one process.

#![allow(dead_code)]

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// Create an empty lock file inside `dir` and return its path.
pub fn lock_file(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("lockyard.lock");
    std::fs::write(&path, b"").unwrap();
    path
}

fn open(path: &Path) -> File {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .expect("probe open")
}

/// Whether an exclusive lock could be taken on `path` right now.
pub fn probe_exclusive(path: &Path) -> bool {
    let file = open(path);
    if file.try_lock_exclusive().is_ok() {
        let _ = file.unlock();
        true
    } else {
        false
    }
}

/// Whether a shared lock could be taken on `path` right now.
pub fn probe_shared(path: &Path) -> bool {
    let file = open(path);
    if file.try_lock_shared().is_ok() {
        let _ = file.unlock();
        true
    } else {
        false
    }
}

/// An external party holding a lock on `path` until dropped.
pub struct Holder {
    file: File,
}

impl Holder {
    pub fn exclusive(path: &Path) -> Self {
        let file = open(path);
        file.lock_exclusive().expect("holder exclusive");
        Self { file }
    }

    pub fn shared(path: &Path) -> Self {
        let file = open(path);
        file.lock_shared().expect("holder shared");
        Self { file }
    }

    pub fn release(self) {}
}

impl Drop for Holder {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
