#![forbid(unsafe_code)]

//! Per-binding coalescing on a microtask-like timing source.

use std::fmt;
use std::rc::Rc;

use super::{Behavior, RenderStrategy, ScheduleHandle, Work};
use crate::host::TimingSource;

/// Defers each binding's commit to the next drain of its timing source.
///
/// All triggers on a binding before that drain collapse into one commit
/// (the scheduler keeps at most one pending handle per binding).
pub struct LocalStrategy {
    timing: Rc<dyn TimingSource>,
}

impl LocalStrategy {
    /// Schedule commits on `timing` (normally [`EventLoop::microtasks`]).
    ///
    /// [`EventLoop::microtasks`]: crate::host::EventLoop::microtasks
    pub fn new(timing: impl TimingSource + 'static) -> Self {
        Self {
            timing: Rc::new(timing),
        }
    }
}

impl fmt::Debug for LocalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStrategy")
            .field("timing", &self.timing.label())
            .finish()
    }
}

impl RenderStrategy for LocalStrategy {
    fn behavior(&self) -> Behavior {
        Behavior::DEFERRED
    }

    fn schedule(&self, work: Work) -> ScheduleHandle {
        ScheduleHandle::Host(self.timing.request_callback(work.into_task()))
    }

    fn cancel(&self, handle: ScheduleHandle) {
        if let ScheduleHandle::Host(handle) = handle {
            self.timing.cancel_callback(handle);
        }
    }
}
