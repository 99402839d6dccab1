//! In-process references to a held lock state.
//!
//! All guards targeting the same state on the same mutex share one token;
//! the token's disposal runs exactly once, when the last reference is
//! dropped, and performs the demote-or-release transition.

use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, error};

use crate::types::state::LockState;

use super::Inner;

/// Shared token recording the state it keeps locked. Disposal is the
/// release hook.
#[derive(Debug)]
pub(crate) struct StateToken {
    state: LockState,
    handle: Arc<Mutex<Inner>>,
}

impl Drop for StateToken {
    fn drop(&mut self) {
        let mut inner = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        // A mismatch means we were superseded by a higher lock state or
        // someone unlocked the mutex directly; nothing to release then.
        if inner.state != self.state {
            debug!(
                "dropped stale {} reference on {}",
                self.state,
                inner.dump()
            );
            return;
        }
        match self.state {
            LockState::Exclusive => {
                // Our own slot is already expired here; only the shared
                // slot decides between releasing and demoting.
                if inner.shared_refs.strong_count() == 0 {
                    inner.unlock();
                } else {
                    inner.demote_to_shared();
                }
            }
            LockState::Shared => {
                if inner.exclusive_refs.strong_count() != 0 {
                    error!(
                        "unexpected mutex state: exclusive references alive in {}",
                        inner.dump()
                    );
                }
                inner.unlock_sharable();
            }
            LockState::Unlocked => {}
        }
        debug!("dropped {} reference; mutex now {}", self.state, inner.dump());
    }
}

/// A guard's reference to a lock state; inert for the unlocked target.
#[derive(Debug, Default, Clone)]
pub(crate) struct StateRef(Option<Arc<StateToken>>);

impl StateRef {
    pub(crate) fn none() -> Self {
        Self(None)
    }

    pub(crate) fn is_held(&self) -> bool {
        self.0.is_some()
    }
}

/// Obtain a reference to `target` on the mutex behind `handle`, reusing the
/// live token for that state if one exists.
pub(crate) fn acquire_ref(handle: &Arc<Mutex<Inner>>, target: LockState) -> StateRef {
    if target == LockState::Unlocked {
        return StateRef::none();
    }
    let mut inner = handle.lock().unwrap_or_else(PoisonError::into_inner);
    let shared_slot = target == LockState::Shared;
    let existing = if shared_slot {
        inner.shared_refs.upgrade()
    } else {
        inner.exclusive_refs.upgrade()
    };
    if let Some(token) = existing {
        debug!("shared {} reference on {}", target, inner.dump());
        return StateRef(Some(token));
    }
    let token = Arc::new(StateToken {
        state: target,
        handle: Arc::clone(handle),
    });
    if shared_slot {
        inner.shared_refs = Arc::downgrade(&token);
    } else {
        inner.exclusive_refs = Arc::downgrade(&token);
    }
    debug!("new {} reference on {}", target, inner.dump());
    StateRef(Some(token))
}
