#![forbid(unsafe_code)]

//! The coalescing scheduler: at most one pending commit per binding.
//!
//! [`CoalescingScheduler::trigger`] is called whenever a binding's slots
//! change. What happens depends on the strategy's [`Behavior`]:
//!
//! | Strategy behavior | Nothing pending | Commit already pending |
//! |-------------------|-----------------|------------------------|
//! | synchronous | commit inline | (never pending) |
//! | deferred, coalescing | schedule one commit | no-op |
//! | deferred, non-coalescing | schedule one commit | queue one more, strictly after |
//! | disabled (`noop`) | record only | record only |
//!
//! Work never captures slot values. A commit reads the binding's *current*
//! state when it executes, so coalesced triggers always observe the latest
//! value of every slot.
//!
//! # Invariants
//!
//! 1. A binding has at most one entry in the pending map.
//! 2. The pending entry is removed *before* the commit runs, so a trigger
//!    raised from inside a commit schedules a fresh commit instead of being
//!    swallowed.
//! 3. Work whose pending entry was cancelled or replaced is a no-op when it
//!    eventually runs (ticket mismatch).
//! 4. No scheduler borrow is held while strategies or commit targets run.
//!
//! # Failure Modes
//!
//! - Commit target dropped before the work fires: the work is a no-op.
//! - Scheduler dropped before the work fires: the work is a no-op.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;

use crate::strategy::{BindingId, ScheduleHandle, StrategyRef, Work};

#[cfg(doc)]
use crate::strategy::Behavior;

/// Receiver of scheduled commits (a binding).
pub trait CommitTarget {
    /// Run one commit against the target's current state.
    fn commit(&self);
}

/// Counters describing what the scheduler decided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Calls to `trigger`.
    pub triggers: u64,
    /// Commits handed to a deferred strategy.
    pub scheduled: u64,
    /// Triggers absorbed by an already pending commit.
    pub coalesced: u64,
    /// Extra commits queued behind a pending one.
    pub queued: u64,
    /// Commits that ran (inline or deferred).
    pub executed: u64,
    /// Pending commits cancelled.
    pub cancelled: u64,
    /// Triggers recorded by a strategy that never commits.
    pub recorded: u64,
}

struct PendingCommit {
    strategy: StrategyRef,
    handle: Option<ScheduleHandle>,
    queued: u32,
    ticket: u64,
}

#[derive(Default)]
struct SchedulerState {
    pending: AHashMap<BindingId, PendingCommit>,
    next_ticket: u64,
    stats: SchedulerStats,
}

/// Decides when each binding's commit runs. Clones share the same pending
/// map.
#[derive(Clone, Default)]
pub struct CoalescingScheduler {
    state: Rc<RefCell<SchedulerState>>,
}

impl fmt::Debug for CoalescingScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("CoalescingScheduler")
            .field("pending", &state.pending.len())
            .field("stats", &state.stats)
            .finish()
    }
}

impl CoalescingScheduler {
    /// An empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a commit for `binding` under `strategy`.
    pub fn trigger(
        &self,
        binding: BindingId,
        strategy: &StrategyRef,
        target: Weak<dyn CommitTarget>,
    ) {
        let behavior = strategy.behavior();
        self.state.borrow_mut().stats.triggers += 1;

        if !behavior.commits {
            self.state.borrow_mut().stats.recorded += 1;
            tracing::trace!(%binding, strategy = strategy.name(), "trigger recorded");
            strategy.schedule(Work::new(binding, || {}));
            return;
        }

        if behavior.synchronous {
            self.state.borrow_mut().stats.executed += 1;
            tracing::trace!(%binding, strategy = strategy.name(), "commit inline");
            strategy.schedule(Work::new(binding, move || {
                if let Some(target) = target.upgrade() {
                    target.commit();
                }
            }));
            return;
        }

        let ticket = {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            if let Some(pending) = state.pending.get_mut(&binding) {
                if behavior.is_coalescing() {
                    state.stats.coalesced += 1;
                    tracing::trace!(%binding, strategy = strategy.name(), "trigger coalesced");
                } else {
                    pending.queued += 1;
                    state.stats.queued += 1;
                    tracing::trace!(
                        %binding,
                        strategy = strategy.name(),
                        queued = pending.queued,
                        "commit queued behind pending"
                    );
                }
                return;
            }
            state.next_ticket += 1;
            let ticket = state.next_ticket;
            state.pending.insert(
                binding,
                PendingCommit {
                    strategy: strategy.clone(),
                    handle: None,
                    queued: 0,
                    ticket,
                },
            );
            ticket
        };
        self.dispatch(binding, strategy, ticket, target);
    }

    /// Cancel the binding's pending commit, if any. Idempotent.
    ///
    /// Returns `true` when a commit was pending.
    pub fn cancel(&self, binding: BindingId) -> bool {
        let removed = {
            let mut state = self.state.borrow_mut();
            let removed = state.pending.remove(&binding);
            if removed.is_some() {
                state.stats.cancelled += 1;
            }
            removed
        };
        let Some(pending) = removed else {
            return false;
        };
        tracing::trace!(%binding, strategy = pending.strategy.name(), "pending commit cancelled");
        if let Some(handle) = pending.handle {
            pending.strategy.cancel(handle);
        }
        true
    }

    /// Whether `binding` has a commit waiting.
    #[must_use]
    pub fn is_pending(&self, binding: BindingId) -> bool {
        self.state.borrow().pending.contains_key(&binding)
    }

    /// Number of bindings with a commit waiting.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.borrow().pending.len()
    }

    /// Decision counters so far.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.state.borrow().stats
    }

    fn dispatch(
        &self,
        binding: BindingId,
        strategy: &StrategyRef,
        ticket: u64,
        target: Weak<dyn CommitTarget>,
    ) {
        self.state.borrow_mut().stats.scheduled += 1;
        tracing::trace!(%binding, strategy = strategy.name(), "commit scheduled");
        let scheduler = Rc::downgrade(&self.state);
        let handle = strategy.schedule(Work::new(binding, move || {
            if let Some(state) = scheduler.upgrade() {
                Self { state }.execute(binding, ticket, &target);
            }
        }));
        let mut state = self.state.borrow_mut();
        if let Some(pending) = state.pending.get_mut(&binding)
            && pending.ticket == ticket
        {
            pending.handle = Some(handle);
        }
    }

    fn execute(&self, binding: BindingId, ticket: u64, target: &Weak<dyn CommitTarget>) {
        let taken = {
            let mut state = self.state.borrow_mut();
            if state.pending.get(&binding).is_none_or(|p| p.ticket != ticket) {
                return;
            }
            let taken = state.pending.remove(&binding);
            if taken.is_some() {
                state.stats.executed += 1;
            }
            taken
        };
        let Some(done) = taken else {
            return;
        };
        let Some(target) = target.upgrade() else {
            return;
        };
        tracing::trace!(%binding, strategy = done.strategy.name(), "commit executing");
        target.commit();

        if done.queued == 0 {
            return;
        }
        let ticket = {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            if let Some(pending) = state.pending.get_mut(&binding) {
                pending.queued += done.queued;
                return;
            }
            state.next_ticket += 1;
            let ticket = state.next_ticket;
            state.pending.insert(
                binding,
                PendingCommit {
                    strategy: done.strategy.clone(),
                    handle: None,
                    queued: done.queued - 1,
                    ticket,
                },
            );
            ticket
        };
        self.dispatch(binding, &done.strategy, ticket, Rc::downgrade(&target));
    }
}
