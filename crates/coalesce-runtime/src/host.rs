#![forbid(unsafe_code)]

//! Reference host environment: a deterministic, single-threaded event loop.
//!
//! Render strategies never talk to a platform directly. They consume
//! [`TimingSource`]s (`request_callback() -> handle`, `cancel_callback(handle)`)
//! and the host decides when each queue is drained. [`EventLoop`] provides the
//! four primitives the built-in strategies need:
//!
//! | Source | Drained by | Re-entrant requests |
//! |--------|------------|---------------------|
//! | microtasks | [`EventLoop::run_microtasks`] | run in the same drain |
//! | animation frames | [`EventLoop::run_frame`] | land in the next frame |
//! | idle callbacks | [`EventLoop::run_idle`] | land in the next idle window |
//! | timeouts | [`EventLoop::run_timers`] | fire once their due time passes |
//!
//! Time comes from a [`Clock`]: [`SystemClock`] for real programs and
//! [`ManualClock`] for tests that need exact deadlines.
//!
//! # Invariants
//!
//! 1. Callbacks in one queue run in request order.
//! 2. A cancelled callback never runs, even if it was already part of the
//!    batch being drained.
//! 3. No loop state is borrowed while a callback runs, so callbacks may
//!    request or cancel work freely.
//! 4. Microtasks are drained after every frame, idle, and timer callback.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use crate::error::ErrorReport;

/// A unit of deferred work handed to a timing source.
pub type Task = Box<dyn FnOnce()>;

/// Opaque handle for a requested callback, used for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackHandle(u64);

impl CallbackHandle {
    /// Raw handle value.
    #[inline]
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

/// A host primitive that runs a task later and can take it back.
pub trait TimingSource {
    /// Short name used in logs (`"microtask"`, `"frame"`, ...).
    fn label(&self) -> &'static str;

    /// Request that `task` runs at this source's next opportunity.
    fn request_callback(&self, task: Task) -> CallbackHandle;

    /// Cancel a previously requested callback.
    ///
    /// Returns `true` when the callback was still queued.
    fn cancel_callback(&self, handle: CallbackHandle) -> bool;
}

// ---------------------------------------------------------------------------
// Clocks
// ---------------------------------------------------------------------------

/// Monotonic time since the clock's origin.
pub trait Clock {
    /// Elapsed time since the clock was created.
    fn now(&self) -> Duration;
}

/// Wall-clock time backed by `web_time::Instant` (works on wasm too).
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: web_time::Instant,
}

impl SystemClock {
    /// Start a clock at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: web_time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    /// A clock at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get().saturating_add(by));
    }

    /// Jump to an absolute time. Moving backwards is ignored.
    pub fn set(&self, to: Duration) {
        if to > self.now.get() {
            self.now.set(to);
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

// ---------------------------------------------------------------------------
// EventLoop
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LoopState {
    next_id: u64,
    microtasks: VecDeque<(CallbackHandle, Task)>,
    frames: VecDeque<(CallbackHandle, Task)>,
    idle: VecDeque<(CallbackHandle, Task)>,
    timers: BTreeMap<(Duration, CallbackHandle), Task>,
    uncaught: Vec<ErrorReport>,
}

impl LoopState {
    fn next_handle(&mut self) -> CallbackHandle {
        self.next_id += 1;
        CallbackHandle(self.next_id)
    }
}

struct LoopInner {
    clock: Box<dyn Clock>,
    state: RefCell<LoopState>,
}

/// Single-threaded event loop driving microtasks, frames, idle windows and
/// timers. Clones share the same queues.
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<LoopInner>,
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("EventLoop")
            .field("now", &self.inner.clock.now())
            .field("microtasks", &state.microtasks.len())
            .field("frames", &state.frames.len())
            .field("idle", &state.idle.len())
            .field("timers", &state.timers.len())
            .finish()
    }
}

impl EventLoop {
    /// Create a loop reading time from `clock`.
    pub fn new(clock: impl Clock + 'static) -> Self {
        Self {
            inner: Rc::new(LoopInner {
                clock: Box::new(clock),
                state: RefCell::new(LoopState::default()),
            }),
        }
    }

    /// Create a loop on real time.
    #[must_use]
    pub fn with_system_clock() -> Self {
        Self::new(SystemClock::new())
    }

    /// Current loop time.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.inner.clock.now()
    }

    /// Queue a microtask.
    pub fn queue_microtask(&self, task: Task) -> CallbackHandle {
        let mut state = self.inner.state.borrow_mut();
        let handle = state.next_handle();
        state.microtasks.push_back((handle, task));
        handle
    }

    /// Request a callback on the next animation frame.
    pub fn request_frame(&self, task: Task) -> CallbackHandle {
        let mut state = self.inner.state.borrow_mut();
        let handle = state.next_handle();
        state.frames.push_back((handle, task));
        handle
    }

    /// Request a callback in the next idle window.
    pub fn request_idle(&self, task: Task) -> CallbackHandle {
        let mut state = self.inner.state.borrow_mut();
        let handle = state.next_handle();
        state.idle.push_back((handle, task));
        handle
    }

    /// Run `task` once `delay` has elapsed.
    pub fn set_timeout(&self, delay: Duration, task: Task) -> CallbackHandle {
        let due = self.now().saturating_add(delay);
        let mut state = self.inner.state.borrow_mut();
        let handle = state.next_handle();
        state.timers.insert((due, handle), task);
        handle
    }

    /// Cancel a callback in any queue. Returns `true` if it was still queued.
    pub fn cancel(&self, handle: CallbackHandle) -> bool {
        let mut guard = self.inner.state.borrow_mut();
        let state = &mut *guard;
        for queue in [&mut state.microtasks, &mut state.frames, &mut state.idle] {
            if let Some(pos) = queue.iter().position(|(h, _)| *h == handle) {
                queue.remove(pos);
                return true;
            }
        }
        let key = state.timers.keys().find(|(_, h)| *h == handle).copied();
        key.is_some_and(|key| state.timers.remove(&key).is_some())
    }

    /// Timing source backed by the microtask queue.
    #[must_use]
    pub fn microtasks(&self) -> MicrotaskSource {
        MicrotaskSource { host: self.clone() }
    }

    /// Timing source backed by animation frames.
    #[must_use]
    pub fn frames(&self) -> FrameSource {
        FrameSource { host: self.clone() }
    }

    /// Timing source backed by idle windows.
    #[must_use]
    pub fn idle(&self) -> IdleSource {
        IdleSource { host: self.clone() }
    }

    /// Timing source that fires `delay` after each request.
    #[must_use]
    pub fn timeout(&self, delay: Duration) -> TimeoutSource {
        TimeoutSource {
            host: self.clone(),
            delay,
        }
    }

    /// Drain the microtask queue, including microtasks queued while draining.
    ///
    /// Returns the number of callbacks run.
    pub fn run_microtasks(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.inner.state.borrow_mut().microtasks.pop_front();
            let Some((_, task)) = next else {
                return ran;
            };
            task();
            ran += 1;
        }
    }

    /// Fire every timer whose due time has passed.
    pub fn run_timers(&self) -> usize {
        let mut ran = self.run_microtasks();
        loop {
            let now = self.now();
            let next = {
                let mut state = self.inner.state.borrow_mut();
                let due = state
                    .timers
                    .keys()
                    .next()
                    .copied()
                    .filter(|(due, _)| *due <= now);
                due.and_then(|key| state.timers.remove(&key))
            };
            let Some(task) = next else {
                return ran;
            };
            task();
            ran += 1 + self.run_microtasks();
        }
    }

    /// Run one animation frame: every frame callback requested before the
    /// frame started, in request order.
    pub fn run_frame(&self) -> usize {
        let mut ran = self.run_microtasks();
        let boundary = self.inner.state.borrow().next_id;
        while let Some(task) = self.pop_before(boundary, |s| &mut s.frames) {
            task();
            ran += 1 + self.run_microtasks();
        }
        ran
    }

    /// Signal an idle window: run every idle callback requested before the
    /// window opened.
    pub fn run_idle(&self) -> usize {
        let mut ran = self.run_microtasks();
        let boundary = self.inner.state.borrow().next_id;
        while let Some(task) = self.pop_before(boundary, |s| &mut s.idle) {
            task();
            ran += 1 + self.run_microtasks();
        }
        ran
    }

    /// One loop turn: microtasks, due timers, then a frame.
    pub fn tick(&self) -> usize {
        self.run_microtasks() + self.run_timers() + self.run_frame()
    }

    /// Whether any callback is still queued (idle callbacks included).
    #[must_use]
    pub fn has_pending(&self) -> bool {
        let state = self.inner.state.borrow();
        !(state.microtasks.is_empty()
            && state.frames.is_empty()
            && state.idle.is_empty()
            && state.timers.is_empty())
    }

    /// Raise an error asynchronously: it is logged and surfaces through
    /// [`take_uncaught`](Self::take_uncaught) on the next microtask drain.
    pub fn raise_uncaught(&self, report: ErrorReport) {
        let host = self.clone();
        self.queue_microtask(Box::new(move || {
            tracing::error!(context = %report.context, error = %report.error, "uncaught render error");
            host.inner.state.borrow_mut().uncaught.push(report);
        }));
    }

    /// Take every error raised with no handler to receive it.
    pub fn take_uncaught(&self) -> Vec<ErrorReport> {
        std::mem::take(&mut self.inner.state.borrow_mut().uncaught)
    }

    fn pop_before(
        &self,
        boundary: u64,
        queue: impl Fn(&mut LoopState) -> &mut VecDeque<(CallbackHandle, Task)>,
    ) -> Option<Task> {
        let mut state = self.inner.state.borrow_mut();
        let queue = queue(&mut *state);
        if queue.front().is_some_and(|(h, _)| h.0 <= boundary) {
            queue.pop_front().map(|(_, task)| task)
        } else {
            None
        }
    }
}

/// [`TimingSource`] over [`EventLoop::queue_microtask`].
#[derive(Debug, Clone)]
pub struct MicrotaskSource {
    host: EventLoop,
}

impl TimingSource for MicrotaskSource {
    fn label(&self) -> &'static str {
        "microtask"
    }

    fn request_callback(&self, task: Task) -> CallbackHandle {
        self.host.queue_microtask(task)
    }

    fn cancel_callback(&self, handle: CallbackHandle) -> bool {
        self.host.cancel(handle)
    }
}

/// [`TimingSource`] over [`EventLoop::request_frame`].
#[derive(Debug, Clone)]
pub struct FrameSource {
    host: EventLoop,
}

impl TimingSource for FrameSource {
    fn label(&self) -> &'static str {
        "frame"
    }

    fn request_callback(&self, task: Task) -> CallbackHandle {
        self.host.request_frame(task)
    }

    fn cancel_callback(&self, handle: CallbackHandle) -> bool {
        self.host.cancel(handle)
    }
}

/// [`TimingSource`] over [`EventLoop::request_idle`].
#[derive(Debug, Clone)]
pub struct IdleSource {
    host: EventLoop,
}

impl TimingSource for IdleSource {
    fn label(&self) -> &'static str {
        "idle"
    }

    fn request_callback(&self, task: Task) -> CallbackHandle {
        self.host.request_idle(task)
    }

    fn cancel_callback(&self, handle: CallbackHandle) -> bool {
        self.host.cancel(handle)
    }
}

/// [`TimingSource`] over [`EventLoop::set_timeout`] with a fixed delay.
#[derive(Debug, Clone)]
pub struct TimeoutSource {
    host: EventLoop,
    delay: Duration,
}

impl TimeoutSource {
    /// Delay applied to each request.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl TimingSource for TimeoutSource {
    fn label(&self) -> &'static str {
        "timeout"
    }

    fn request_callback(&self, task: Task) -> CallbackHandle {
        self.host.set_timeout(self.delay, task)
    }

    fn cancel_callback(&self, handle: CallbackHandle) -> bool {
        self.host.cancel(handle)
    }
}
