#![forbid(unsafe_code)]

//! Low-priority strategy: commit in an idle window, or at a hard deadline.
//!
//! Every scheduled commit races two host callbacks: an idle callback and a
//! deadline timer. Whichever fires first runs the work and cancels the other,
//! so a binding starved of idle time is force-flushed once the deadline
//! elapses.
//!
//! The deadline is per strategy instance. [`DEFAULT_IDLE_DEADLINE`] (1 s) is
//! used by [`StrategyConfig`](crate::config::StrategyConfig) unless
//! configured otherwise.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use ahash::AHashMap;

use super::{Behavior, RenderStrategy, ScheduleHandle, Work};
use crate::host::{CallbackHandle, Task, TimeoutSource, TimingSource};

/// Forced-flush deadline used when none is configured.
pub const DEFAULT_IDLE_DEADLINE: Duration = Duration::from_millis(1_000);

struct Entry {
    task: Task,
    idle: Option<CallbackHandle>,
    deadline: Option<CallbackHandle>,
}

struct Shared {
    idle: Box<dyn TimingSource>,
    deadline: TimeoutSource,
    next_token: RefCell<u64>,
    entries: RefCell<AHashMap<u64, Entry>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Idle,
    Deadline,
}

impl Shared {
    fn fire(&self, token: u64, trigger: Trigger) {
        let Some(entry) = self.entries.borrow_mut().remove(&token) else {
            return;
        };
        let other = match trigger {
            Trigger::Idle => entry.deadline.map(|h| (h, &self.deadline as &dyn TimingSource)),
            Trigger::Deadline => entry.idle.map(|h| (h, &*self.idle)),
        };
        if let Some((handle, source)) = other {
            source.cancel_callback(handle);
        }
        if trigger == Trigger::Deadline {
            tracing::debug!(
                token,
                deadline_ms = self.deadline.delay().as_millis() as u64,
                "idle window missed; forcing flush at deadline"
            );
        }
        (entry.task)();
    }
}

/// Defers commits to idle windows with a forced-flush deadline.
pub struct IdleStrategy {
    shared: Rc<Shared>,
}

impl IdleStrategy {
    /// Run work on `idle`, or on `deadline` if no idle window arrives first.
    ///
    /// The deadline length is the timeout source's delay.
    pub fn new(idle: impl TimingSource + 'static, deadline: TimeoutSource) -> Self {
        Self {
            shared: Rc::new(Shared {
                idle: Box::new(idle),
                deadline,
                next_token: RefCell::new(0),
                entries: RefCell::new(AHashMap::new()),
            }),
        }
    }

    /// Maximum time a commit may wait for an idle window.
    #[must_use]
    pub fn deadline(&self) -> Duration {
        self.shared.deadline.delay()
    }

    /// Commits waiting for an idle window or their deadline.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.shared.entries.borrow().len()
    }
}

impl fmt::Debug for IdleStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdleStrategy")
            .field("idle", &self.shared.idle.label())
            .field("deadline", &self.deadline())
            .field("waiting", &self.waiting())
            .finish()
    }
}

impl RenderStrategy for IdleStrategy {
    fn behavior(&self) -> Behavior {
        Behavior::DEFERRED
    }

    fn schedule(&self, work: Work) -> ScheduleHandle {
        let token = {
            let mut next = self.shared.next_token.borrow_mut();
            *next += 1;
            *next
        };
        self.shared.entries.borrow_mut().insert(
            token,
            Entry {
                task: work.into_task(),
                idle: None,
                deadline: None,
            },
        );

        let shared = Rc::clone(&self.shared);
        let idle = self
            .shared
            .idle
            .request_callback(Box::new(move || shared.fire(token, Trigger::Idle)));
        let shared = Rc::clone(&self.shared);
        let deadline = self
            .shared
            .deadline
            .request_callback(Box::new(move || shared.fire(token, Trigger::Deadline)));

        if let Some(entry) = self.shared.entries.borrow_mut().get_mut(&token) {
            entry.idle = Some(idle);
            entry.deadline = Some(deadline);
        }
        ScheduleHandle::Token(token)
    }

    fn cancel(&self, handle: ScheduleHandle) {
        let ScheduleHandle::Token(token) = handle else {
            return;
        };
        let Some(entry) = self.shared.entries.borrow_mut().remove(&token) else {
            return;
        };
        if let Some(h) = entry.idle {
            self.shared.idle.cancel_callback(h);
        }
        if let Some(h) = entry.deadline {
            self.shared.deadline.cancel_callback(h);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{EventLoop, ManualClock};
    use crate::strategy::BindingId;
    use std::cell::Cell;

    fn counting_work(hits: &Rc<Cell<u32>>) -> Work {
        let hits = Rc::clone(hits);
        Work::new(BindingId::from_raw(1), move || hits.set(hits.get() + 1))
    }

    #[test]
    fn idle_window_runs_work_and_disarms_deadline() {
        let clock = ManualClock::new();
        let host = EventLoop::new(clock.clone());
        let strategy = IdleStrategy::new(host.idle(), host.timeout(Duration::from_millis(100)));
        let hits = Rc::new(Cell::new(0));
        strategy.schedule(counting_work(&hits));

        host.run_idle();
        assert_eq!(hits.get(), 1);
        clock.advance(Duration::from_millis(200));
        host.run_timers();
        assert_eq!(hits.get(), 1, "deadline timer was cancelled");
        assert!(!host.has_pending());
    }

    #[test]
    fn deadline_forces_flush_without_idle_window() {
        let clock = ManualClock::new();
        let host = EventLoop::new(clock.clone());
        let strategy = IdleStrategy::new(host.idle(), host.timeout(Duration::from_millis(100)));
        let hits = Rc::new(Cell::new(0));
        strategy.schedule(counting_work(&hits));

        clock.advance(Duration::from_millis(99));
        host.tick();
        assert_eq!(hits.get(), 0);

        clock.advance(Duration::from_millis(1));
        host.tick();
        assert_eq!(hits.get(), 1);
        assert_eq!(strategy.waiting(), 0);
        assert!(!host.has_pending(), "idle callback was cancelled");
    }

    #[test]
    fn cancel_disarms_both_callbacks() {
        let clock = ManualClock::new();
        let host = EventLoop::new(clock.clone());
        let strategy = IdleStrategy::new(host.idle(), host.timeout(DEFAULT_IDLE_DEADLINE));
        let hits = Rc::new(Cell::new(0));
        let handle = strategy.schedule(counting_work(&hits));
        strategy.cancel(handle);
        assert!(!host.has_pending());
        clock.advance(DEFAULT_IDLE_DEADLINE);
        host.run_idle();
        host.run_timers();
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn default_deadline_is_one_second() {
        assert_eq!(DEFAULT_IDLE_DEADLINE, Duration::from_secs(1));
    }
}
