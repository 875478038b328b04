#![forbid(unsafe_code)]

//! Disabled scheduling: triggers are recorded and never committed.

use std::cell::Cell;

use super::{Behavior, RenderStrategy, ScheduleHandle, Work};

/// Records triggers without executing them.
///
/// Bindings on this strategy only commit when flushed manually
/// ([`BindingHandle::flush`](crate::binding::BindingHandle::flush)).
#[derive(Debug, Default)]
pub struct NoopStrategy {
    recorded: Cell<u64>,
}

impl NoopStrategy {
    /// Create the strategy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of triggers recorded so far.
    #[must_use]
    pub fn recorded(&self) -> u64 {
        self.recorded.get()
    }
}

impl RenderStrategy for NoopStrategy {
    fn behavior(&self) -> Behavior {
        Behavior::DISABLED
    }

    fn schedule(&self, work: Work) -> ScheduleHandle {
        let n = self.recorded.get() + 1;
        self.recorded.set(n);
        tracing::trace!(binding = %work.binding(), recorded = n, "noop strategy recorded trigger");
        ScheduleHandle::Token(n)
    }

    fn cancel(&self, _handle: ScheduleHandle) {}
}
