use std::fmt;

/// The internal state of an [`IpMutex`](crate::IpMutex).
///
/// States are ordered: `Unlocked < Shared < Exclusive`. A guard requests a
/// state change exactly when the current state is below its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockState {
    /// No lock is held on the mutex file.
    Unlocked,
    /// A shared (read) lock is held; other processes may share it.
    Shared,
    /// An exclusive (write) lock is held.
    Exclusive,
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LockState::Unlocked => "unlocked",
            LockState::Shared => "shared",
            LockState::Exclusive => "exclusive",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_are_ordered() {
        assert!(LockState::Unlocked < LockState::Shared);
        assert!(LockState::Shared < LockState::Exclusive);
    }

    #[test]
    fn display_names() {
        assert_eq!(LockState::Unlocked.to_string(), "unlocked");
        assert_eq!(LockState::Shared.to_string(), "shared");
        assert_eq!(LockState::Exclusive.to_string(), "exclusive");
    }
}
