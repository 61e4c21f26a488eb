//! Admission gate for protected work.
//!
//! Work that must not be cut off mid-way (a request being served, a file
//! being written) takes the gate before starting and releases it when done.
//! Once shutdown starts the gate refuses new holders, and the shutdown
//! sequence waits, bounded by the configured timeout, for current holders to
//! leave before the first stage fires.

use crate::coordinator::Shared;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Holder count plus the closed flag, guarded by the coordinator lock.
#[derive(Debug, Default)]
pub(crate) struct Gate {
    closed: bool,
    holders: usize,
}

impl Gate {
    /// Admit one holder unless the gate is closed.
    pub(crate) fn acquire(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.holders += 1;
        true
    }

    /// Release one holder. Returns true when the last holder left.
    pub(crate) fn release(&mut self) -> bool {
        match self.holders.checked_sub(1) {
            Some(remaining) => {
                self.holders = remaining;
                remaining == 0
            }
            None => {
                warn!("admission gate released without a matching acquire");
                false
            }
        }
    }

    /// Close the gate. Returns false if it was already closed.
    pub(crate) fn close(&mut self) -> bool {
        !std::mem::replace(&mut self.closed, true)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn holders(&self) -> usize {
        self.holders
    }
}

/// Block until every holder has released or `timeout` elapses.
///
/// Returns false on timeout; that is not an error, the caller proceeds.
pub(crate) fn drain(shared: &Shared, timeout: Duration) -> bool {
    let deadline = Instant::now().checked_add(timeout);
    let mut state = shared.state.lock();
    while state.gate.holders() > 0 {
        match deadline {
            Some(deadline) => {
                if shared.released.wait_until(&mut state, deadline).timed_out() {
                    return state.gate.holders() == 0;
                }
            }
            None => shared.released.wait(&mut state),
        }
    }
    true
}

/// Admission held for the lifetime of the guard.
///
/// Obtained from [`Coordinator::enter`](crate::Coordinator::enter); dropping
/// the guard releases the gate.
#[must_use = "the gate is released as soon as the guard is dropped"]
pub struct GateGuard {
    shared: Arc<Shared>,
}

impl GateGuard {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.shared.release();
    }
}

impl std::fmt::Debug for GateGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateGuard").finish_non_exhaustive()
    }
}
