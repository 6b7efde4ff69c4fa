use std::time::Duration;

use parking_lot::Condvar;
use parking_lot::Mutex;

use crate::DispatchError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct BarrierState {
    remaining: usize,
    resolve_enabled: bool,
    abandoned: bool,
}

/// Completion gate of one synchronously posted event.
///
/// The dispatching worker brackets every ping with [`begin`](Self::begin) /
/// [`end`](Self::end) and calls [`enable_resolve`](Self::enable_resolve) once
/// it has walked all generators. The poster is released when resolve is
/// enabled and no ping is outstanding.
#[derive(Debug, Default)]
pub struct DispatchBarrier {
    state: Mutex<BarrierState>,
    cond: Condvar,
}

impl DispatchBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) {
        self.state.lock().remaining += 1;
    }

    pub fn end(&self) {
        let mut state = self.state.lock();
        state.remaining = state.remaining.saturating_sub(1);
        if state.resolve_enabled && state.remaining == 0 {
            self.cond.notify_all();
        }
    }

    pub fn enable_resolve(&self) {
        let mut state = self.state.lock();
        state.resolve_enabled = true;
        if state.remaining == 0 {
            self.cond.notify_all();
        }
    }

    /// The event will never be dispatched (queue shut down)
    pub fn abandon(&self) {
        self.state.lock().abandoned = true;
        self.cond.notify_all();
    }

    pub fn is_resolved(&self) -> bool {
        let state = self.state.lock();
        state.resolve_enabled && state.remaining == 0
    }

    /// Blocks until resolved. Returns [`DispatchError::ShutDown`] if the event
    /// was abandoned or `shut_down` reports the queue stopped first.
    pub fn wait(
        &self,
        shut_down: impl Fn() -> bool,
    ) -> Result<(), DispatchError> {
        let mut state = self.state.lock();
        loop {
            if state.resolve_enabled && state.remaining == 0 {
                return Ok(());
            }
            if state.abandoned {
                return Err(DispatchError::ShutDown);
            }
            if self.cond.wait_for(&mut state, POLL_INTERVAL).timed_out() && shut_down() {
                if state.resolve_enabled && state.remaining == 0 {
                    return Ok(());
                }
                return Err(DispatchError::ShutDown);
            }
        }
    }
}
