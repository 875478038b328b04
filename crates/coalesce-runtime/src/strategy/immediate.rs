#![forbid(unsafe_code)]

//! Synchronous strategy: every trigger commits inline, in call order.

use super::{Behavior, RenderStrategy, ScheduleHandle, Work};

/// Runs each commit on the caller's stack before `schedule` returns.
///
/// Re-entrant triggers (a commit callback feeding a slot of its own binding)
/// nest: the inner commit finishes before the outer one resumes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateStrategy;

impl ImmediateStrategy {
    /// Create the strategy.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl RenderStrategy for ImmediateStrategy {
    fn behavior(&self) -> Behavior {
        Behavior::SYNCHRONOUS
    }

    fn schedule(&self, work: Work) -> ScheduleHandle {
        work.run();
        ScheduleHandle::Completed
    }

    fn cancel(&self, _handle: ScheduleHandle) {}
}
