#![forbid(unsafe_code)]

//! Version-tracked shared values with change notification.
//!
//! # Invariants
//!
//! 1. The version increments exactly once per mutation that changes the value.
//! 2. Subscribers are notified in registration order.
//! 3. Setting a value equal to the current one is a no-op.
//! 4. No borrow is held while subscriber callbacks run, so a callback may
//!    read or even set the observable again.
//!
//! # Failure Modes
//!
//! - Subscriber panic: propagates to the caller of `set()`; the value has
//!   already been updated.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::source::{Connection, Notification, Sink, Source};

type Callback<T> = dyn Fn(&T);

struct ObservableInner<T> {
    value: T,
    version: u64,
    subscribers: Vec<Weak<Callback<T>>>,
}

/// A shared, version-tracked value. Clones share the same cell.
pub struct Observable<T> {
    inner: Rc<RefCell<ObservableInner<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Observable")
            .field("value", &inner.value)
            .field("version", &inner.version)
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Observable<T> {
    /// Wrap an initial value at version 0.
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ObservableInner {
                value,
                version: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Clone out the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.borrow().value.clone()
    }

    /// Borrow the current value for the duration of `f`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.borrow().value)
    }

    /// Current version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Replace the value and notify subscribers if it changed.
    pub fn set(&self, value: T) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.value == value {
                return;
            }
            inner.value = value;
            inner.version += 1;
        }
        self.notify();
    }

    /// Mutate the value in place; subscribers are notified if it changed.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        {
            let mut inner = self.inner.borrow_mut();
            let before = inner.value.clone();
            f(&mut inner.value);
            if inner.value == before {
                return;
            }
            inner.version += 1;
        }
        self.notify();
    }

    /// Register `callback` for every subsequent change. The callback stays
    /// registered while the returned [`Subscription`] is alive.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let callback: Rc<Callback<T>> = Rc::new(callback);
        self.inner
            .borrow_mut()
            .subscribers
            .push(Rc::downgrade(&callback));
        Subscription {
            _guard: Box::new(callback),
        }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .borrow()
            .subscribers
            .iter()
            .filter(|s| s.strong_count() > 0)
            .count()
    }

    fn notify(&self) {
        let (value, callbacks) = {
            let mut inner = self.inner.borrow_mut();
            inner.subscribers.retain(|s| s.strong_count() > 0);
            let callbacks: Vec<Rc<Callback<T>>> =
                inner.subscribers.iter().filter_map(Weak::upgrade).collect();
            (inner.value.clone(), callbacks)
        };
        for callback in callbacks {
            callback(&value);
        }
    }
}

impl<T: Clone + PartialEq + 'static> Source<T> for Observable<T> {
    fn connect(&self, sink: Sink<T>) -> Connection {
        sink(Notification::Next(self.get()));
        let subscription = self.subscribe(move |value| sink(Notification::Next(value.clone())));
        Connection::from_subscription(subscription)
    }
}

/// RAII guard keeping an [`Observable`] callback registered.
pub struct Subscription {
    _guard: Box<dyn Any>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn set_bumps_version_and_notifies() {
        let obs = Observable::new(1);
        let seen = Rc::new(Cell::new(0));
        let s = Rc::clone(&seen);
        let _sub = obs.subscribe(move |v| s.set(*v));
        obs.set(5);
        assert_eq!(seen.get(), 5);
        assert_eq!(obs.version(), 1);
    }

    #[test]
    fn equal_set_is_noop() {
        let obs = Observable::new(3);
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let _sub = obs.subscribe(move |_| h.set(h.get() + 1));
        obs.set(3);
        assert_eq!(hits.get(), 0);
        assert_eq!(obs.version(), 0);
    }

    #[test]
    fn dropped_subscription_stops_callbacks() {
        let obs = Observable::new(0);
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let sub = obs.subscribe(move |_| h.set(h.get() + 1));
        obs.set(1);
        drop(sub);
        obs.set(2);
        assert_eq!(hits.get(), 1);
        assert_eq!(obs.subscriber_count(), 0);
    }

    #[test]
    fn update_in_place() {
        let obs = Observable::new(vec![1]);
        obs.update(|v| v.push(2));
        assert_eq!(obs.get(), vec![1, 2]);
        assert_eq!(obs.version(), 1);
        obs.update(|_| {});
        assert_eq!(obs.version(), 1);
    }

    #[test]
    fn callback_may_set_again() {
        let obs = Observable::new(0);
        let again = obs.clone();
        let _sub = obs.subscribe(move |v| {
            if *v < 3 {
                again.set(v + 1);
            }
        });
        obs.set(1);
        assert_eq!(obs.get(), 3);
    }

    #[test]
    fn connect_emits_current_value_first() {
        let obs = Observable::new("a");
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        let conn = obs.connect(Rc::new(move |n: Notification<&'static str>| {
            l.borrow_mut().push(n);
        }));
        obs.set("b");
        drop(conn);
        obs.set("c");
        assert_eq!(
            *log.borrow(),
            vec![Notification::Next("a"), Notification::Next("b")]
        );
    }
}
