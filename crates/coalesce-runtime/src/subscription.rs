#![forbid(unsafe_code)]

//! Named value slots fed by sources.
//!
//! A [`SubscriptionManager`] owns one slot per declared name. Each slot
//! remembers the latest value, its last error and its status, and holds the
//! [`Connection`] to its current source. Every accepted notification that
//! changes what a commit would show fires the manager's update callback,
//! which the owning binding routes to the scheduler. A completion that
//! follows a value only marks the slot `Completed`.
//!
//! # Slot lifecycle
//!
//! ```text
//! subscribe ──► Pending ──Next──► Live ──Complete──► Completed
//!                  │               │
//!                  └────Error──────┴──────Error────► Errored
//! ```
//!
//! `Completed` and `Errored` are terminal for the current source. Replacing
//! the source starts a fresh `Pending` slot.
//!
//! # Invariants
//!
//! 1. Replacing a source unsubscribes the old one synchronously before the
//!    new one is connected.
//! 2. Notifications carry the generation of the connection that produced
//!    them; anything from an older generation is dropped, so a replaced
//!    source can never write into the slot.
//! 3. Errors stay on the slot that raised them. Sibling slots keep their
//!    values and keep triggering.
//! 4. No slot borrow is held while sources connect or disconnect, or while
//!    the update callback runs.
//!
//! # Failure Modes
//!
//! | Condition | Reported as | Slot after |
//! |-----------|-------------|------------|
//! | Source emits `Error` | `SourceEmission` / emission | `Errored`, value kept |
//! | Old source fails to unsubscribe | `Teardown` / teardown | replaced anyway |
//! | Source fails to unsubscribe on destroy | `Teardown` / teardown | removed anyway |

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{ErrorContext, Phase, RuntimeError, SourceError};
use crate::error_sink::ErrorSink;
use crate::reactive::{Connection, Notification, Sink, Source};
use crate::strategy::BindingId;

/// What a binding does after one of its slots errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "policy-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum ErrorPolicy {
    /// Keep committing with the slot's last good value.
    #[default]
    KeepLastValue,
    /// Skip commits until the errored slot's source is replaced.
    SuppressUntilReplaced,
}

/// Status of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotStatus {
    /// Subscribed, no value yet.
    Pending,
    /// Has a value; the source is still live.
    Live,
    /// The source completed; the value (if any) is final.
    Completed,
    /// The source failed; the last good value (if any) is kept.
    Errored,
}

impl SlotStatus {
    /// Whether the current source can no longer update the slot.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored)
    }
}

struct Slot<V> {
    value: Option<V>,
    error: Option<SourceError>,
    status: SlotStatus,
    generation: u64,
    connection: Option<Connection>,
}

impl<V> Slot<V> {
    fn fresh(generation: u64) -> Self {
        Self {
            value: None,
            error: None,
            status: SlotStatus::Pending,
            generation,
            connection: None,
        }
    }
}

enum Delivery {
    Ignored,
    Settled,
    Updated,
    Failed(SourceError),
}

struct ManagerInner<V> {
    binding: BindingId,
    policy: ErrorPolicy,
    errors: ErrorSink,
    slots: RefCell<BTreeMap<String, Slot<V>>>,
    next_generation: Cell<u64>,
    on_update: RefCell<Option<Rc<dyn Fn()>>>,
    updated_while_inactive: Cell<bool>,
}

/// Slot table of one binding. Clones share the same slots.
pub struct SubscriptionManager<V> {
    inner: Rc<ManagerInner<V>>,
}

impl<V> Clone for SubscriptionManager<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for SubscriptionManager<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.inner.slots.borrow();
        f.debug_struct("SubscriptionManager")
            .field("binding", &self.inner.binding)
            .field("policy", &self.inner.policy)
            .field(
                "slots",
                &slots
                    .iter()
                    .map(|(name, slot)| (name.as_str(), slot.status))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl<V: Clone + 'static> SubscriptionManager<V> {
    /// An empty slot table for `binding`.
    #[must_use]
    pub fn new(binding: BindingId, policy: ErrorPolicy, errors: ErrorSink) -> Self {
        Self {
            inner: Rc::new(ManagerInner {
                binding,
                policy,
                errors,
                slots: RefCell::new(BTreeMap::new()),
                next_generation: Cell::new(0),
                on_update: RefCell::new(None),
                updated_while_inactive: Cell::new(false),
            }),
        }
    }

    /// Binding these slots belong to.
    #[must_use]
    pub fn binding(&self) -> BindingId {
        self.inner.binding
    }

    /// Active error policy.
    #[must_use]
    pub fn policy(&self) -> ErrorPolicy {
        self.inner.policy
    }

    /// Bind `name` to `source`, replacing (and synchronously unsubscribing)
    /// any previous source of that slot.
    pub fn subscribe(&self, name: impl Into<String>, source: &dyn Source<V>) {
        let name = name.into();
        let generation = self.inner.next_generation.get() + 1;
        self.inner.next_generation.set(generation);

        let previous = {
            let mut slots = self.inner.slots.borrow_mut();
            match slots.get_mut(&name) {
                Some(slot) => {
                    let old = slot.connection.take();
                    *slot = Slot::fresh(generation);
                    old
                }
                None => {
                    slots.insert(name.clone(), Slot::fresh(generation));
                    None
                }
            }
        };
        if let Some(old) = previous {
            tracing::debug!(binding = %self.inner.binding, slot = %name, "slot source replaced");
            self.teardown(&name, old);
        }

        let connection = source.connect(self.sink(name.clone(), generation));

        let stale = {
            let mut slots = self.inner.slots.borrow_mut();
            match slots.get_mut(&name) {
                Some(slot) if slot.generation == generation => {
                    slot.connection = Some(connection);
                    None
                }
                _ => Some(connection),
            }
        };
        if let Some(stale) = stale {
            self.teardown(&name, stale);
        }
    }

    /// Remove a slot, unsubscribing its source. Returns `false` if the slot
    /// did not exist.
    pub fn remove(&self, name: &str) -> bool {
        let removed = self.inner.slots.borrow_mut().remove(name);
        let Some(slot) = removed else {
            return false;
        };
        if let Some(connection) = slot.connection {
            self.teardown(name, connection);
        }
        true
    }

    /// Unsubscribe every slot, reporting (not raising) teardown failures.
    ///
    /// Returns the number of sources whose teardown failed.
    pub fn unsubscribe_all(&self) -> usize {
        let slots = std::mem::take(&mut *self.inner.slots.borrow_mut());
        let mut failures = 0;
        for (name, slot) in slots {
            if let Some(connection) = slot.connection
                && !self.teardown(&name, connection)
            {
                failures += 1;
            }
        }
        failures
    }

    /// Route updates to `on_update` from now on.
    ///
    /// Returns `true` when some slot updated while no callback was set
    /// (for example, sources that emitted synchronously on subscribe).
    pub fn activate(&self, on_update: Rc<dyn Fn()>) -> bool {
        *self.inner.on_update.borrow_mut() = Some(on_update);
        self.inner.updated_while_inactive.replace(false)
    }

    /// Stop routing updates.
    pub fn deactivate(&self) {
        self.inner.on_update.borrow_mut().take();
    }

    /// Whether commits are currently suppressed by the error policy.
    #[must_use]
    pub fn is_suppressed(&self) -> bool {
        self.inner.policy == ErrorPolicy::SuppressUntilReplaced
            && self
                .inner
                .slots
                .borrow()
                .values()
                .any(|slot| slot.status == SlotStatus::Errored)
    }

    /// Status of one slot.
    #[must_use]
    pub fn status(&self, name: &str) -> Option<SlotStatus> {
        self.inner.slots.borrow().get(name).map(|slot| slot.status)
    }

    /// Declared slot names, sorted.
    #[must_use]
    pub fn slot_names(&self) -> Vec<String> {
        self.inner.slots.borrow().keys().cloned().collect()
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.slots.borrow().len()
    }

    /// Whether no slot is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.slots.borrow().is_empty()
    }

    /// Capture the current state of every slot.
    #[must_use]
    pub fn snapshot(&self) -> CommitContext<V> {
        let slots = self.inner.slots.borrow();
        CommitContext {
            slots: slots
                .iter()
                .map(|(name, slot)| {
                    (
                        name.clone(),
                        SlotView {
                            value: slot.value.clone(),
                            status: slot.status,
                            error: slot.error.clone(),
                        },
                    )
                })
                .collect(),
        }
    }

    fn sink(&self, name: String, generation: u64) -> Sink<V> {
        let weak: Weak<ManagerInner<V>> = Rc::downgrade(&self.inner);
        Rc::new(move |notification| {
            if let Some(inner) = weak.upgrade() {
                SubscriptionManager { inner }.deliver(&name, generation, notification);
            }
        })
    }

    fn deliver(&self, name: &str, generation: u64, notification: Notification<V>) {
        let delivery = {
            let mut slots = self.inner.slots.borrow_mut();
            match slots.get_mut(name) {
                Some(slot) if slot.generation == generation && !slot.status.is_terminal() => {
                    match notification {
                        Notification::Next(value) => {
                            slot.value = Some(value);
                            slot.error = None;
                            slot.status = SlotStatus::Live;
                            Delivery::Updated
                        }
                        // A completion after a value changes nothing a
                        // commit would render; only an empty one does.
                        Notification::Complete => {
                            slot.status = SlotStatus::Completed;
                            if slot.value.is_some() {
                                Delivery::Settled
                            } else {
                                Delivery::Updated
                            }
                        }
                        Notification::Error(err) => {
                            slot.error = Some(err.clone());
                            slot.status = SlotStatus::Errored;
                            Delivery::Failed(err)
                        }
                    }
                }
                _ => Delivery::Ignored,
            }
        };

        match delivery {
            Delivery::Ignored => {
                tracing::trace!(binding = %self.inner.binding, slot = name, "stale notification dropped");
            }
            Delivery::Settled => {
                tracing::trace!(binding = %self.inner.binding, slot = name, "slot completed");
            }
            Delivery::Updated => self.notify(),
            Delivery::Failed(err) => {
                self.inner.errors.report(
                    ErrorContext::slot(self.inner.binding, name, Phase::Emission),
                    RuntimeError::SourceEmission(err),
                );
                if self.inner.policy == ErrorPolicy::KeepLastValue {
                    self.notify();
                }
            }
        }
    }

    fn notify(&self) {
        let callback = self.inner.on_update.borrow().clone();
        match callback {
            Some(callback) => callback(),
            None => self.inner.updated_while_inactive.set(true),
        }
    }

    fn teardown(&self, name: &str, connection: Connection) -> bool {
        match connection.unsubscribe() {
            Ok(()) => true,
            Err(err) => {
                self.inner.errors.report(
                    ErrorContext::slot(self.inner.binding, name, Phase::Teardown),
                    RuntimeError::Teardown(err),
                );
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// CommitContext
// ---------------------------------------------------------------------------

/// One slot as seen by a commit.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotView<V> {
    /// Latest value, if any arrived.
    pub value: Option<V>,
    /// Slot status at commit time.
    pub status: SlotStatus,
    /// Last error, if the source failed.
    pub error: Option<SourceError>,
}

/// What the commit callback receives: the latest value of every slot plus
/// suspense, error and completion state.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitContext<V> {
    slots: BTreeMap<String, SlotView<V>>,
}

impl<V> CommitContext<V> {
    /// Latest value of `slot`.
    #[must_use]
    pub fn get(&self, slot: &str) -> Option<&V> {
        self.slots.get(slot).and_then(|view| view.value.as_ref())
    }

    /// Full view of `slot`.
    #[must_use]
    pub fn slot(&self, slot: &str) -> Option<&SlotView<V>> {
        self.slots.get(slot)
    }

    /// Status of `slot`.
    #[must_use]
    pub fn status(&self, slot: &str) -> Option<SlotStatus> {
        self.slots.get(slot).map(|view| view.status)
    }

    /// Last error of `slot`.
    #[must_use]
    pub fn error(&self, slot: &str) -> Option<&SourceError> {
        self.slots.get(slot).and_then(|view| view.error.as_ref())
    }

    /// Some slot has not produced a value yet.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.slots.values().any(|view| view.value.is_none())
    }

    /// Every slot's source has completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.slots.is_empty()
            && self
                .slots
                .values()
                .all(|view| view.status == SlotStatus::Completed)
    }

    /// Some slot carries an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.slots.values().any(|view| view.error.is_some())
    }

    /// `(slot, error)` pairs for every errored slot.
    pub fn errors(&self) -> impl Iterator<Item = (&str, &SourceError)> {
        self.slots
            .iter()
            .filter_map(|(name, view)| view.error.as_ref().map(|err| (name.as_str(), err)))
    }

    /// `(slot, value)` pairs for every slot with a value, sorted by name.
    pub fn values(&self) -> impl Iterator<Item = (&str, &V)> {
        self.slots
            .iter()
            .filter_map(|(name, view)| view.value.as_ref().map(|v| (name.as_str(), v)))
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the binding has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
