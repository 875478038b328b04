#![forbid(unsafe_code)]

//! Render strategies: pluggable policies deciding when a commit runs.
//!
//! A strategy receives [`Work`] (one pending commit for one binding) and
//! returns a [`ScheduleHandle`] that can later be passed to
//! [`RenderStrategy::cancel`]. Its [`Behavior`] tells the scheduler how to
//! treat triggers that arrive while a commit is already pending.
//!
//! | Strategy | synchronous | coalescing | timing source |
//! |----------|-------------|------------|---------------|
//! | [`ImmediateStrategy`] | yes | none | caller's stack |
//! | [`LocalStrategy`] | no | per binding | microtask |
//! | [`GlobalStrategy`] | no | per tick, all bindings | animation frame |
//! | [`IdleStrategy`] | no | per binding | idle window + deadline timer |
//! | [`NoopStrategy`] | n/a | n/a | never runs |
//!
//! Strategies are immutable once registered; any bookkeeping they keep
//! (batches, timers) is interior and private.

use std::fmt;
use std::rc::Rc;

use crate::host::{CallbackHandle, Task};

mod global;
mod idle;
mod immediate;
mod local;
mod noop;

pub use global::GlobalStrategy;
pub use idle::{DEFAULT_IDLE_DEADLINE, IdleStrategy};
pub use immediate::ImmediateStrategy;
pub use local::LocalStrategy;
pub use noop::NoopStrategy;

/// Identity of a binding. Ids increase with creation order, which is the
/// order global flushes commit in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(u64);

impl BindingId {
    /// Build an id from its raw value.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw id value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "binding#{}", self.0)
    }
}

/// How triggers that arrive while a commit is pending are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coalescing {
    /// Every trigger gets its own commit, in order.
    None,
    /// Triggers on one binding collapse into its pending commit.
    PerBinding,
    /// Like `PerBinding`, and all bindings flush together once per tick.
    PerTick,
}

/// Scheduling behavior advertised by a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Behavior {
    /// The commit runs before `schedule` returns.
    pub synchronous: bool,
    /// Trigger coalescing mode.
    pub coalescing: Coalescing,
    /// Whether scheduled work is ever executed. `false` means triggers are
    /// only recorded and commits happen through manual flushing.
    pub commits: bool,
}

impl Behavior {
    /// Inline, one commit per trigger.
    pub const SYNCHRONOUS: Self = Self {
        synchronous: true,
        coalescing: Coalescing::None,
        commits: true,
    };

    /// Deferred, coalesced per binding.
    pub const DEFERRED: Self = Self {
        synchronous: false,
        coalescing: Coalescing::PerBinding,
        commits: true,
    };

    /// Deferred, coalesced across bindings into one flush per tick.
    pub const PER_TICK: Self = Self {
        synchronous: false,
        coalescing: Coalescing::PerTick,
        commits: true,
    };

    /// Triggers are recorded, never executed.
    pub const DISABLED: Self = Self {
        synchronous: false,
        coalescing: Coalescing::PerBinding,
        commits: false,
    };

    /// Whether a second trigger collapses into a pending commit.
    #[must_use]
    pub const fn is_coalescing(self) -> bool {
        !matches!(self.coalescing, Coalescing::None)
    }
}

/// One pending commit for one binding.
pub struct Work {
    binding: BindingId,
    run: Task,
}

impl Work {
    /// Wrap `run` as the commit work for `binding`.
    pub fn new(binding: BindingId, run: impl FnOnce() + 'static) -> Self {
        Self {
            binding,
            run: Box::new(run),
        }
    }

    /// The binding this work commits.
    #[must_use]
    pub fn binding(&self) -> BindingId {
        self.binding
    }

    /// Execute the work.
    pub fn run(self) {
        (self.run)();
    }

    /// Convert into a host task.
    #[must_use]
    pub fn into_task(self) -> Task {
        self.run
    }
}

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Work")
            .field("binding", &self.binding)
            .finish_non_exhaustive()
    }
}

/// Handle returned by [`RenderStrategy::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleHandle {
    /// The work already ran inline.
    Completed,
    /// A host callback carries the work.
    Host(CallbackHandle),
    /// Strategy-private token (batches, paired timers, recordings).
    Token(u64),
}

/// A scheduling policy for render commits.
pub trait RenderStrategy {
    /// Scheduling behavior.
    fn behavior(&self) -> Behavior;

    /// Enqueue `work` for later (or immediate) execution.
    fn schedule(&self, work: Work) -> ScheduleHandle;

    /// Cancel previously scheduled work. Unknown or completed handles are
    /// ignored.
    fn cancel(&self, handle: ScheduleHandle);
}

/// A registered strategy together with its registry name. Cheap to clone.
#[derive(Clone)]
pub struct StrategyRef {
    name: Rc<str>,
    strategy: Rc<dyn RenderStrategy>,
}

impl StrategyRef {
    /// Pair a strategy with a name.
    pub fn new(name: impl Into<Rc<str>>, strategy: Rc<dyn RenderStrategy>) -> Self {
        Self {
            name: name.into(),
            strategy,
        }
    }

    /// Registry name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scheduling behavior.
    #[must_use]
    pub fn behavior(&self) -> Behavior {
        self.strategy.behavior()
    }

    /// Forward to [`RenderStrategy::schedule`].
    pub fn schedule(&self, work: Work) -> ScheduleHandle {
        self.strategy.schedule(work)
    }

    /// Forward to [`RenderStrategy::cancel`].
    pub fn cancel(&self, handle: ScheduleHandle) {
        self.strategy.cancel(handle);
    }

    /// Whether both refs point at the same strategy instance.
    #[must_use]
    pub fn same_instance(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.strategy, &other.strategy)
    }
}

impl fmt::Debug for StrategyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRef")
            .field("name", &self.name)
            .field("behavior", &self.behavior())
            .finish()
    }
}
