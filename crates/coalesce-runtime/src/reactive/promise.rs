#![forbid(unsafe_code)]

//! Resolve-once sources.
//!
//! A [`Promise`] settles at most once, through its [`Resolver`]. Settlement
//! delivers `Next(value)` followed by `Complete`, or a single `Error`.
//! Sinks connected after settlement receive the outcome immediately.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::SourceError;

use super::source::{Connection, Notification, Sink, Source};

enum Settlement<T> {
    Pending {
        next_id: u64,
        waiting: Vec<(u64, Sink<T>)>,
    },
    Resolved(T),
    Rejected(SourceError),
}

impl<T: Clone> Settlement<T> {
    fn replay(&self) -> Vec<Notification<T>> {
        match self {
            Self::Resolved(value) => vec![Notification::Next(value.clone()), Notification::Complete],
            Self::Rejected(err) => vec![Notification::Error(err.clone())],
            Self::Pending { .. } => Vec::new(),
        }
    }
}

/// Read side of a resolve-once value.
pub struct Promise<T> {
    state: Rc<RefCell<Settlement<T>>>,
}

/// Write side of a [`Promise`].
pub struct Resolver<T> {
    state: Weak<RefCell<Settlement<T>>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: Clone + 'static> Promise<T> {
    /// A pending promise and the resolver that settles it.
    #[must_use]
    pub fn new() -> (Self, Resolver<T>) {
        let state = Rc::new(RefCell::new(Settlement::Pending {
            next_id: 0,
            waiting: Vec::new(),
        }));
        let resolver = Resolver {
            state: Rc::downgrade(&state),
        };
        (Self { state }, resolver)
    }

    /// An already resolved promise.
    pub fn resolved(value: T) -> Self {
        Self {
            state: Rc::new(RefCell::new(Settlement::Resolved(value))),
        }
    }

    /// An already rejected promise.
    pub fn rejected(error: SourceError) -> Self {
        Self {
            state: Rc::new(RefCell::new(Settlement::Rejected(error))),
        }
    }

    /// Whether the promise has resolved or rejected.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !matches!(*self.state.borrow(), Settlement::Pending { .. })
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match &*self.state.borrow() {
            Settlement::Pending { .. } => "pending",
            Settlement::Resolved(_) => "resolved",
            Settlement::Rejected(_) => "rejected",
        };
        f.debug_struct("Promise").field("status", &status).finish()
    }
}

impl<T: Clone + 'static> Resolver<T> {
    /// Settle with a value. Returns `false` if already settled or if every
    /// promise handle and connection is gone.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Settlement::Resolved(value))
    }

    /// Settle with an error. Returns `false` if already settled.
    pub fn reject(&self, error: SourceError) -> bool {
        self.settle(Settlement::Rejected(error))
    }

    fn settle(&self, outcome: Settlement<T>) -> bool {
        let Some(state) = self.state.upgrade() else {
            return false;
        };
        let (waiting, replay) = {
            let mut current = state.borrow_mut();
            let Settlement::Pending { waiting, .. } = &mut *current else {
                return false;
            };
            let waiting = std::mem::take(waiting);
            let replay = outcome.replay();
            *current = outcome;
            (waiting, replay)
        };
        for (_, sink) in waiting {
            for notification in replay.iter().cloned() {
                sink(notification);
            }
        }
        true
    }
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("live", &(self.state.strong_count() > 0))
            .finish()
    }
}

impl<T: Clone + 'static> Source<T> for Promise<T> {
    fn connect(&self, sink: Sink<T>) -> Connection {
        let replay = self.state.borrow().replay();
        if !replay.is_empty() {
            for notification in replay {
                sink(notification);
            }
            return Connection::empty();
        }
        let id = {
            let mut current = self.state.borrow_mut();
            let Settlement::Pending { next_id, waiting } = &mut *current else {
                return Connection::empty();
            };
            *next_id += 1;
            waiting.push((*next_id, sink));
            *next_id
        };
        // The connection keeps the promise alive so a resolver can still
        // settle it after the caller dropped its own handle.
        let state = Rc::clone(&self.state);
        Connection::new(move || {
            if let Settlement::Pending { waiting, .. } = &mut *state.borrow_mut() {
                waiting.retain(|(other, _)| *other != id);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> (Rc<RefCell<Vec<Notification<u8>>>>, Sink<u8>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        (log, Rc::new(move |n: Notification<u8>| l.borrow_mut().push(n)))
    }

    #[test]
    fn resolve_delivers_value_then_complete() {
        let (promise, resolver) = Promise::new();
        let (log, sink) = collector();
        let _conn = promise.connect(sink);
        assert!(log.borrow().is_empty());
        assert!(resolver.resolve(9));
        assert_eq!(
            *log.borrow(),
            vec![Notification::Next(9), Notification::Complete]
        );
        assert!(!resolver.resolve(10), "settles once");
        assert!(!resolver.reject(SourceError::msg("late")));
    }

    #[test]
    fn late_connect_sees_outcome() {
        let promise = Promise::rejected(SourceError::msg("nope"));
        let (log, sink) = collector();
        let conn = promise.connect(sink);
        assert!(!conn.is_active());
        assert_eq!(
            *log.borrow(),
            vec![Notification::Error(SourceError::msg("nope"))]
        );
        assert!(promise.is_settled());
    }

    #[test]
    fn disconnected_sink_is_not_notified() {
        let (promise, resolver) = Promise::new();
        let (log, sink) = collector();
        let conn = promise.connect(sink);
        drop(conn);
        resolver.resolve(1);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn resolver_without_promise_is_inert() {
        let (promise, resolver) = Promise::<u8>::new();
        drop(promise);
        assert!(!resolver.resolve(1));
    }

    #[test]
    fn live_connection_keeps_promise_settleable() {
        let (promise, resolver) = Promise::new();
        let (log, sink) = collector();
        let _conn = promise.connect(sink);
        drop(promise);
        assert!(resolver.resolve(3));
        assert_eq!(log.borrow()[0], Notification::Next(3));
    }
}
