use std::time::Duration;
use std::time::Instant;

use parking_lot::Condvar;
use parking_lot::Mutex;
use parking_lot::MutexGuard;

/// State guarded by a mutex plus the one condition variable blocking
/// callers wait on. Timeouts are absolute deadlines; `None` waits forever.
#[derive(Debug, Default)]
pub(crate) struct Monitor<S> {
    state: Mutex<S>,
    cond: Condvar,
}

impl<S> Monitor<S> {
    pub(crate) fn new(state: S) -> Self {
        Self {
            state: Mutex::new(state),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, S> {
        self.state.lock()
    }

    pub(crate) fn notify_all(&self) {
        self.cond.notify_all();
    }

    /// Blocks until `done` holds or `deadline` passes. The returned guard
    /// lets the caller settle the state atomically with the final check.
    pub(crate) fn wait_until(
        &self,
        deadline: Option<Instant>,
        mut done: impl FnMut(&mut S) -> bool,
    ) -> MutexGuard<'_, S> {
        let mut state = self.state.lock();
        while !done(&mut state) {
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.cond.wait(&mut state),
            }
        }
        state
    }
}

/// Deadline `timeout` from now, or `None` when it lies beyond what
/// [`Instant`] can represent (e.g. `Duration::MAX`).
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}
