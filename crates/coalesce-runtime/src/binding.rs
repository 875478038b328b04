#![forbid(unsafe_code)]

//! Render bindings: named slot sources plus a commit callback.
//!
//! [`RenderBinding::create`] subscribes every slot, then activates the
//! binding. From then on each slot update triggers the scheduler, and each
//! commit hands the callback a [`CommitContext`] carrying the latest value
//! of every slot.
//!
//! ```
//! use coalesce_runtime::{
//!     EventLoop, ManualClock, Observable, RenderBinding, RenderRuntime, SlotSources,
//!     StrategyConfig,
//! };
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let host = EventLoop::new(ManualClock::new());
//! let runtime = RenderRuntime::from_config(host.clone(), &StrategyConfig::default())?;
//! let count = Observable::new(1);
//! let rendered = Rc::new(RefCell::new(Vec::new()));
//! let out = Rc::clone(&rendered);
//!
//! let handle = RenderBinding::create(
//!     &runtime,
//!     SlotSources::new().with("count", count.clone()),
//!     None,
//!     move |ctx| {
//!         out.borrow_mut().push(*ctx.get("count").unwrap_or(&0));
//!         Ok(())
//!     },
//! )?;
//!
//! count.set(2);
//! count.set(3);
//! host.run_microtasks();
//! assert_eq!(*rendered.borrow(), vec![3]);
//! handle.destroy();
//! # Ok::<(), coalesce_runtime::RegistryError>(())
//! ```
//!
//! # State machine
//!
//! ```text
//! Initializing ──(all slots subscribed)──► Active ──destroy()──► Destroyed
//! ```
//!
//! # Invariants
//!
//! 1. Commits only run while `Active`; triggers on a `Destroyed` binding are
//!    no-ops.
//! 2. `destroy()` is idempotent and always runs to completion: every slot is
//!    unsubscribed and the pending commit cancelled even if some teardown
//!    fails.
//! 3. Emissions during `Initializing` collapse into at most one trigger,
//!    raised on activation.
//! 4. Synchronous re-entrant commits nest at most
//!    [`MAX_REENTRANT_COMMITS`] deep; deeper commits are dropped and
//!    reported.
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | Unknown strategy name | `create` / `set_strategy` return `UnknownStrategy` |
//! | Commit callback returns `Err` | reported as `Commit`; binding stays active |
//! | Slot source errors | reported as `SourceEmission`; error policy applies |
//! | Unsubscribe fails | reported as `Teardown`; teardown continues |

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{CommitError, ErrorContext, Phase, RegistryError, RuntimeError};
use crate::reactive::Source;
use crate::runtime::RenderRuntime;
use crate::scheduler::{CommitTarget, CoalescingScheduler};
use crate::strategy::{BindingId, StrategyRef};
use crate::subscription::{CommitContext, ErrorPolicy, SlotStatus, SubscriptionManager};

/// Nesting limit for synchronous commits that re-trigger their own binding.
pub const MAX_REENTRANT_COMMITS: u32 = 64;

/// Lifecycle of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingState {
    /// Slots are being subscribed.
    Initializing,
    /// Live; updates trigger commits.
    Active,
    /// Torn down. Terminal.
    Destroyed,
}

type CommitFn<V> = dyn Fn(&CommitContext<V>) -> Result<(), CommitError>;

// ---------------------------------------------------------------------------
// SlotSources
// ---------------------------------------------------------------------------

/// Named sources a binding is created with.
pub struct SlotSources<V> {
    entries: Vec<(String, Box<dyn Source<V>>)>,
}

impl<V> Default for SlotSources<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<V> SlotSources<V> {
    /// No slots yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a slot.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, source: impl Source<V> + 'static) -> Self {
        self.push(name, source);
        self
    }

    /// Add a slot in place.
    pub fn push(&mut self, name: impl Into<String>, source: impl Source<V> + 'static) {
        self.entries.push((name.into(), Box::new(source)));
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no slot was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V, N: Into<String>> FromIterator<(N, Box<dyn Source<V>>)> for SlotSources<V> {
    fn from_iter<I: IntoIterator<Item = (N, Box<dyn Source<V>>)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(name, source)| (name.into(), source))
                .collect(),
        }
    }
}

impl<V> fmt::Debug for SlotSources<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(name, _)| name))
            .finish()
    }
}

/// Per-binding overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingOptions {
    /// Strategy name; the registry's primary when `None`.
    pub strategy: Option<String>,
    /// Error policy; the runtime default when `None`.
    pub error_policy: Option<ErrorPolicy>,
}

impl BindingOptions {
    /// Use the named strategy.
    #[must_use]
    pub fn strategy(mut self, name: impl Into<String>) -> Self {
        self.strategy = Some(name.into());
        self
    }

    /// Use `policy` for slot errors.
    #[must_use]
    pub fn error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = Some(policy);
        self
    }
}

// ---------------------------------------------------------------------------
// RenderBinding
// ---------------------------------------------------------------------------

/// A live binding. Owned through a [`BindingHandle`].
pub struct RenderBinding<V> {
    id: BindingId,
    state: Cell<BindingState>,
    runtime: RenderRuntime,
    strategy: RefCell<StrategyRef>,
    slots: SubscriptionManager<V>,
    on_commit: Box<CommitFn<V>>,
    depth: Cell<u32>,
    commits: Cell<u64>,
    me: Weak<RenderBinding<V>>,
}

impl<V: Clone + 'static> RenderBinding<V> {
    /// Subscribe `sources` and activate a binding committing through
    /// `on_commit` under `strategy` (the registry's primary when `None`).
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownStrategy`] if `strategy` names no registered
    /// strategy. No source is subscribed in that case.
    pub fn create(
        runtime: &RenderRuntime,
        sources: SlotSources<V>,
        strategy: Option<&str>,
        on_commit: impl Fn(&CommitContext<V>) -> Result<(), CommitError> + 'static,
    ) -> Result<BindingHandle<V>, RegistryError> {
        let options = BindingOptions {
            strategy: strategy.map(str::to_owned),
            error_policy: None,
        };
        Self::create_with(runtime, sources, options, on_commit)
    }

    /// Like [`create`](Self::create), with per-binding options.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownStrategy`] for an unknown strategy name.
    pub fn create_with(
        runtime: &RenderRuntime,
        sources: SlotSources<V>,
        options: BindingOptions,
        on_commit: impl Fn(&CommitContext<V>) -> Result<(), CommitError> + 'static,
    ) -> Result<BindingHandle<V>, RegistryError> {
        let strategy = runtime.registry().resolve(options.strategy.as_deref())?;
        let id = runtime.next_binding_id();
        let policy = options
            .error_policy
            .unwrap_or_else(|| runtime.default_policy());
        let slots = SubscriptionManager::new(id, policy, runtime.errors().clone());

        let binding = Rc::new_cyclic(|me| Self {
            id,
            state: Cell::new(BindingState::Initializing),
            runtime: runtime.clone(),
            strategy: RefCell::new(strategy),
            slots,
            on_commit: Box::new(on_commit),
            depth: Cell::new(0),
            commits: Cell::new(0),
            me: me.clone(),
        });
        tracing::debug!(
            binding = %id,
            strategy = binding.strategy_name().as_str(),
            slots = sources.len(),
            ?policy,
            "binding created"
        );

        for (name, source) in sources.entries {
            binding.slots.subscribe(name, &*source);
        }

        binding.state.set(BindingState::Active);
        let me = binding.me.clone();
        let dirty = binding.slots.activate(Rc::new(move || {
            if let Some(binding) = me.upgrade() {
                binding.request_commit();
            }
        }));
        tracing::debug!(binding = %id, initial_commit = dirty, "binding active");
        if dirty {
            binding.request_commit();
        }
        Ok(BindingHandle { binding })
    }

    fn request_commit(&self) {
        if self.state.get() != BindingState::Active {
            tracing::trace!(binding = %self.id, state = ?self.state.get(), "trigger ignored");
            return;
        }
        let strategy = self.strategy.borrow().clone();
        let target: Weak<dyn CommitTarget> = self.me.clone();
        self.scheduler().trigger(self.id, &strategy, target);
    }

    fn scheduler(&self) -> &CoalescingScheduler {
        self.runtime.scheduler()
    }

    fn strategy_name(&self) -> String {
        self.strategy.borrow().name().to_owned()
    }

    fn report_commit_error(&self, error: CommitError) {
        self.runtime.errors().report(
            ErrorContext::binding(self.id, Phase::Commit),
            RuntimeError::Commit(error),
        );
    }

    fn destroy(&self) {
        if self.state.replace(BindingState::Destroyed) == BindingState::Destroyed {
            return;
        }
        let cancelled = self.scheduler().cancel(self.id);
        self.slots.deactivate();
        let failures = self.slots.unsubscribe_all();
        tracing::debug!(
            binding = %self.id,
            cancelled_pending = cancelled,
            teardown_failures = failures,
            "binding destroyed"
        );
    }
}

impl<V: Clone + 'static> CommitTarget for RenderBinding<V> {
    fn commit(&self) {
        if self.state.get() != BindingState::Active {
            return;
        }
        if self.slots.is_suppressed() {
            tracing::trace!(binding = %self.id, "commit suppressed by error policy");
            return;
        }
        let depth = self.depth.get();
        if depth >= MAX_REENTRANT_COMMITS {
            tracing::warn!(binding = %self.id, depth, "re-entrant commit limit reached");
            self.report_commit_error(CommitError::msg(format!(
                "re-entrant commit depth exceeded {MAX_REENTRANT_COMMITS}"
            )));
            return;
        }

        let _span = tracing::debug_span!(
            "binding_commit",
            binding = %self.id,
            strategy = self.strategy_name().as_str(),
            depth
        )
        .entered();

        let context = self.slots.snapshot();
        self.depth.set(depth + 1);
        self.commits.set(self.commits.get() + 1);
        let result = (self.on_commit)(&context);
        self.depth.set(depth);

        if let Err(err) = result {
            self.report_commit_error(err);
        }
    }
}

impl<V> fmt::Debug for RenderBinding<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderBinding")
            .field("id", &self.id)
            .field("state", &self.state.get())
            .field("strategy", &self.strategy.borrow().name())
            .field("slots", &self.slots)
            .field("commits", &self.commits.get())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// BindingHandle
// ---------------------------------------------------------------------------

/// Owning handle of a [`RenderBinding`]. Dropping it destroys the binding.
#[must_use = "dropping a BindingHandle destroys the binding"]
pub struct BindingHandle<V: Clone + 'static> {
    binding: Rc<RenderBinding<V>>,
}

impl<V: Clone + 'static> BindingHandle<V> {
    /// Binding id (creation order).
    #[must_use]
    pub fn id(&self) -> BindingId {
        self.binding.id
    }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> BindingState {
        self.binding.state.get()
    }

    /// Name of the strategy currently scheduling this binding.
    #[must_use]
    pub fn strategy_name(&self) -> String {
        self.binding.strategy_name()
    }

    /// Number of times the commit callback has run.
    #[must_use]
    pub fn commit_count(&self) -> u64 {
        self.binding.commits.get()
    }

    /// Whether a deferred commit is waiting.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.binding.scheduler().is_pending(self.binding.id)
    }

    /// Current slot state, as the next commit would see it.
    #[must_use]
    pub fn snapshot(&self) -> CommitContext<V> {
        self.binding.slots.snapshot()
    }

    /// Status of one slot.
    #[must_use]
    pub fn slot_status(&self, name: &str) -> Option<SlotStatus> {
        self.binding.slots.status(name)
    }

    /// Bind `name` to a new source (adding the slot if needed). The old
    /// source is unsubscribed first. Ignored once destroyed.
    ///
    /// When the new source stays silent on connect, a commit is still
    /// scheduled so the target drops the old value and sees the slot
    /// `Pending`.
    pub fn set_source(&self, name: impl Into<String>, source: impl Source<V> + 'static) {
        if self.state() == BindingState::Destroyed {
            return;
        }
        let name = name.into();
        self.binding.slots.subscribe(name.as_str(), &source);
        if self.binding.slots.status(&name) == Some(SlotStatus::Pending) {
            self.binding.request_commit();
        }
    }

    /// Drop a slot and schedule a commit without it. Returns `false` when the
    /// slot did not exist or the binding is destroyed.
    pub fn remove_slot(&self, name: &str) -> bool {
        if self.state() == BindingState::Destroyed || !self.binding.slots.remove(name) {
            return false;
        }
        self.binding.request_commit();
        true
    }

    /// Switch to another registered strategy. A pending commit is cancelled
    /// and rescheduled under the new strategy.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownStrategy`]; the current strategy is kept.
    pub fn set_strategy(&self, name: &str) -> Result<(), RegistryError> {
        let next = self.binding.runtime.registry().get(name)?;
        let was_pending = self.binding.scheduler().cancel(self.binding.id);
        let previous = self.binding.strategy.replace(next);
        tracing::debug!(
            binding = %self.binding.id,
            from = previous.name(),
            to = name,
            was_pending,
            "binding strategy switched"
        );
        if was_pending {
            self.binding.request_commit();
        }
        Ok(())
    }

    /// Commit now, synchronously, regardless of strategy. Any pending commit
    /// is cancelled since this one supersedes it.
    pub fn flush(&self) {
        if self.state() != BindingState::Active {
            return;
        }
        self.binding.scheduler().cancel(self.binding.id);
        self.binding.commit();
    }

    /// Unsubscribe every slot and cancel the pending commit. Idempotent.
    pub fn destroy(&self) {
        self.binding.destroy();
    }
}

impl<V: Clone + 'static> Drop for BindingHandle<V> {
    fn drop(&mut self) {
        self.binding.destroy();
    }
}

impl<V: Clone + 'static> fmt::Debug for BindingHandle<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BindingHandle").field(&self.binding).finish()
    }
}

// ---------------------------------------------------------------------------
// BindingScope
// ---------------------------------------------------------------------------

/// Type-erased view of a binding handle, so one scope can own bindings of
/// different value types.
pub trait ScopedBinding {
    /// Binding id.
    fn id(&self) -> BindingId;
    /// Lifecycle state.
    fn state(&self) -> BindingState;
    /// Tear the binding down.
    fn destroy(&self);
}

impl<V: Clone + 'static> ScopedBinding for BindingHandle<V> {
    fn id(&self) -> BindingId {
        BindingHandle::id(self)
    }

    fn state(&self) -> BindingState {
        BindingHandle::state(self)
    }

    fn destroy(&self) {
        BindingHandle::destroy(self);
    }
}

/// Owns the bindings of one logical owner (a view, a widget) and destroys
/// them together.
///
/// # Invariants
///
/// 1. Bindings are destroyed in reverse registration order.
/// 2. After `clear()` or drop, no commit from this scope runs.
/// 3. `clear()` leaves the scope empty and reusable.
#[derive(Default)]
pub struct BindingScope {
    bindings: Vec<Box<dyn ScopedBinding>>,
}

impl BindingScope {
    /// An empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `handle`.
    pub fn hold<V: Clone + 'static>(&mut self, handle: BindingHandle<V>) -> BindingId {
        let id = handle.id();
        self.bindings.push(Box::new(handle));
        id
    }

    /// Number of bindings held.
    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    /// Whether the scope holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Ids of the held bindings, in registration order.
    #[must_use]
    pub fn ids(&self) -> Vec<BindingId> {
        self.bindings.iter().map(|b| b.id()).collect()
    }

    /// Destroy every held binding now, newest first.
    pub fn clear(&mut self) {
        while let Some(binding) = self.bindings.pop() {
            binding.destroy();
        }
    }
}

impl Drop for BindingScope {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for BindingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingScope")
            .field("binding_count", &self.bindings.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
