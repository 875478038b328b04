#![forbid(unsafe_code)]

//! Cross-binding coalescing: one flush per tick for every binding.
//!
//! Work scheduled before a tick is collected into a batch keyed by
//! `(generation, binding, token)`. When the timing source fires, the batch
//! for the current generation runs in ascending binding order, which is
//! binding-creation order, regardless of the order triggers arrived in.
//!
//! # Invariants
//!
//! 1. At most one host callback is outstanding per strategy instance.
//! 2. Work scheduled while a flush is running belongs to the next
//!    generation and runs on the next tick, never in the current flush.
//! 3. Cancelling one binding's work leaves the rest of the batch intact,
//!    including work already inside a running flush.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;

use super::{Behavior, BindingId, RenderStrategy, ScheduleHandle, Work};
use crate::host::{CallbackHandle, Task, TimingSource};

type BatchKey = (u64, BindingId, u64);

#[derive(Default)]
struct Batch {
    generation: u64,
    next_token: u64,
    queued: BTreeMap<BatchKey, Task>,
    tokens: AHashMap<u64, BatchKey>,
    flush: Option<CallbackHandle>,
}

struct Shared {
    timing: Box<dyn TimingSource>,
    batch: RefCell<Batch>,
}

/// Batches commits from all bindings into one ordered flush per tick.
pub struct GlobalStrategy {
    shared: Rc<Shared>,
}

impl GlobalStrategy {
    /// Flush on `timing` (normally [`EventLoop::frames`]).
    ///
    /// [`EventLoop::frames`]: crate::host::EventLoop::frames
    pub fn new(timing: impl TimingSource + 'static) -> Self {
        Self {
            shared: Rc::new(Shared {
                timing: Box::new(timing),
                batch: RefCell::new(Batch::default()),
            }),
        }
    }

    /// Number of commits waiting for the next flush.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.batch.borrow().queued.len()
    }
}

impl fmt::Debug for GlobalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let batch = self.shared.batch.borrow();
        f.debug_struct("GlobalStrategy")
            .field("timing", &self.shared.timing.label())
            .field("generation", &batch.generation)
            .field("queued", &batch.queued.len())
            .finish()
    }
}

fn flush(shared: &Shared) {
    let generation = {
        let mut batch = shared.batch.borrow_mut();
        batch.flush = None;
        let generation = batch.generation;
        batch.generation += 1;
        generation
    };
    let mut ran = 0usize;
    loop {
        let next = {
            let mut batch = shared.batch.borrow_mut();
            let key = batch
                .queued
                .keys()
                .next()
                .copied()
                .filter(|key| key.0 == generation);
            key.and_then(|key| {
                batch.tokens.remove(&key.2);
                batch.queued.remove(&key)
            })
        };
        let Some(task) = next else {
            break;
        };
        task();
        ran += 1;
    }
    tracing::trace!(generation, commits = ran, "global flush finished");
}

impl RenderStrategy for GlobalStrategy {
    fn behavior(&self) -> Behavior {
        Behavior::PER_TICK
    }

    fn schedule(&self, work: Work) -> ScheduleHandle {
        let (token, needs_flush) = {
            let mut batch = self.shared.batch.borrow_mut();
            batch.next_token += 1;
            let token = batch.next_token;
            let key = (batch.generation, work.binding(), token);
            batch.queued.insert(key, work.into_task());
            batch.tokens.insert(token, key);
            (token, batch.flush.is_none())
        };
        if needs_flush {
            let shared = Rc::clone(&self.shared);
            let handle = self
                .shared
                .timing
                .request_callback(Box::new(move || flush(&shared)));
            self.shared.batch.borrow_mut().flush = Some(handle);
        }
        ScheduleHandle::Token(token)
    }

    fn cancel(&self, handle: ScheduleHandle) {
        let ScheduleHandle::Token(token) = handle else {
            return;
        };
        let idle_flush = {
            let mut batch = self.shared.batch.borrow_mut();
            if let Some(key) = batch.tokens.remove(&token) {
                batch.queued.remove(&key);
            }
            if batch.queued.is_empty() {
                batch.flush.take()
            } else {
                None
            }
        };
        if let Some(flush) = idle_flush {
            self.shared.timing.cancel_callback(flush);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{EventLoop, ManualClock};

    fn push(log: &Rc<RefCell<Vec<u64>>>, id: u64) -> Work {
        let log = Rc::clone(log);
        Work::new(BindingId::from_raw(id), move || log.borrow_mut().push(id))
    }

    #[test]
    fn flush_runs_in_binding_order() {
        let host = EventLoop::new(ManualClock::new());
        let strategy = GlobalStrategy::new(host.frames());
        let log = Rc::new(RefCell::new(Vec::new()));
        strategy.schedule(push(&log, 3));
        strategy.schedule(push(&log, 1));
        strategy.schedule(push(&log, 2));
        assert_eq!(strategy.queued(), 3);
        host.run_frame();
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
        assert_eq!(strategy.queued(), 0);
    }

    #[test]
    fn one_host_callback_per_tick() {
        let host = EventLoop::new(ManualClock::new());
        let strategy = GlobalStrategy::new(host.frames());
        let log = Rc::new(RefCell::new(Vec::new()));
        strategy.schedule(push(&log, 1));
        strategy.schedule(push(&log, 2));
        assert_eq!(host.run_frame(), 1, "both commits share one frame callback");
    }

    #[test]
    fn cancel_leaves_other_bindings() {
        let host = EventLoop::new(ManualClock::new());
        let strategy = GlobalStrategy::new(host.frames());
        let log = Rc::new(RefCell::new(Vec::new()));
        strategy.schedule(push(&log, 1));
        let h = strategy.schedule(push(&log, 2));
        strategy.schedule(push(&log, 3));
        strategy.cancel(h);
        host.run_frame();
        assert_eq!(*log.borrow(), vec![1, 3]);
    }

    #[test]
    fn cancelling_everything_releases_frame() {
        let host = EventLoop::new(ManualClock::new());
        let strategy = GlobalStrategy::new(host.frames());
        let log = Rc::new(RefCell::new(Vec::new()));
        let h = strategy.schedule(push(&log, 1));
        strategy.cancel(h);
        assert!(!host.has_pending());
    }

    #[test]
    fn work_scheduled_during_flush_waits_for_next_tick() {
        let host = EventLoop::new(ManualClock::new());
        let strategy = Rc::new(GlobalStrategy::new(host.frames()));
        let log = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&strategy);
        let l = Rc::clone(&log);
        strategy.schedule(Work::new(BindingId::from_raw(5), move || {
            l.borrow_mut().push(5);
            s.schedule(push(&l, 1));
        }));
        host.run_frame();
        assert_eq!(*log.borrow(), vec![5]);
        host.run_frame();
        assert_eq!(*log.borrow(), vec![5, 1]);
    }
}
