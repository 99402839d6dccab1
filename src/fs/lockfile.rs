//! Lock-file provisioning for the common mutex locations.
//!
//! Non-privileged callers that can neither access nor create the lock file
//! degrade to the fake-lock sentinel instead of failing, so read-only use
//! of a system does not require root.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use log::debug;
use rustix::fs::{access, chmod, Access, Mode};
use rustix::process::geteuid;

use crate::constants::FAKE_LOCK_PATH;

/// Resolve `path` to a usable mutex file, optionally creating it.
///
/// Order of preference:
/// 1. the file is read/writable by the caller: use it as is (an admin may
///    have opened it up for non-root users on purpose);
/// 2. `create` is set and the file can be created: create with mode 0644,
///    then widen with the 0660 bits;
/// 3. the caller is root: use the path anyway (construction will surface
///    the real error);
/// 4. otherwise fall back to the fake-lock sentinel.
pub(crate) fn usable_lock_file(path: &Path, create: bool) -> PathBuf {
    if user_may_rw(path) {
        return path.to_path_buf();
    }

    if create && !path.exists() && create_lock_file(path).is_ok() {
        return path.to_path_buf();
    }

    if geteuid().is_root() {
        path.to_path_buf()
    } else {
        debug!("no access to lock file {}; faking", path.display());
        PathBuf::from(FAKE_LOCK_PATH)
    }
}

fn user_may_rw(path: &Path) -> bool {
    access(path, Access::READ_OK | Access::WRITE_OK).is_ok()
}

fn create_lock_file(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o644)
        .open(path)?;
    addmod(path, 0o660)?;
    debug!("created lock file {}", path.display());
    Ok(())
}

/// Widen the file mode by `bits`, keeping all currently set bits.
fn addmod(path: &Path, bits: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = std::fs::metadata(path)?.permissions().mode() & 0o7777;
    chmod(path, Mode::from_bits_truncate(mode | bits))
        .map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}
