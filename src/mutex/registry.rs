//! Process-wide registry of live mutexes, keyed by path.
//!
//! Requests for a path with a live mutex return the same instance, so all
//! handles within one process share the reference bookkeeping. Entries hold
//! weak handles only and are removed once the last strong handle expires.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, PoisonError, Weak};

use log::debug;

use crate::types::errors::Result;

use super::Inner;

static MUTEXES: LazyLock<Mutex<HashMap<PathBuf, Weak<Mutex<Inner>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Return the live mutex for `path`, constructing and recording one if
/// necessary.
pub(crate) fn acquire(path: &Path) -> Result<Arc<Mutex<Inner>>> {
    let mut map = MUTEXES.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(existing) = map.get(path).and_then(Weak::upgrade) {
        debug!("reusing live mutex for {}", path.display());
        return Ok(existing);
    }
    let handle = Arc::new(Mutex::new(Inner::open(path)?));
    map.insert(path.to_path_buf(), Arc::downgrade(&handle));
    debug!("new mutex for {}", path.display());
    Ok(handle)
}

/// Drop the registry entry for `path` once its mutex has expired. An entry
/// re-created for the same path in the meantime is left alone.
pub(crate) fn forget(path: &Path) {
    let mut map = MUTEXES.lock().unwrap_or_else(PoisonError::into_inner);
    if map.get(path).is_some_and(|weak| weak.strong_count() == 0) {
        map.remove(path);
    }
}
