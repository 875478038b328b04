#![forbid(unsafe_code)]

//! The source boundary: every slot source is normalized to a stream of
//! [`Notification`]s delivered to a [`Sink`].
//!
//! A source may deliver zero or more `Next` values, optionally followed by
//! exactly one terminal `Error` or `Complete`. Delivery may happen
//! synchronously inside [`Source::connect`] (plain values, observables) or
//! at any later point (subjects, promises).
//!
//! # Invariants
//!
//! 1. A [`Connection`] tears its source down at most once, either through
//!    [`Connection::unsubscribe`] or on drop.
//! 2. Teardown errors on drop are logged, never raised.

use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::error::SourceError;

use super::observable::Subscription;

/// One event from a source.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification<T> {
    /// A new value.
    Next(T),
    /// The source failed. Terminal.
    Error(SourceError),
    /// The source finished. Terminal.
    Complete,
}

impl<T> Notification<T> {
    /// Whether no further notifications follow this one.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Next(_))
    }
}

/// Receiver side of a connection.
pub type Sink<T> = Rc<dyn Fn(Notification<T>)>;

type Teardown = Box<dyn FnOnce() -> Result<(), SourceError>>;

/// A live link between a source and a sink.
#[must_use = "dropping a Connection disconnects the source"]
pub struct Connection {
    teardown: Option<Teardown>,
}

impl Connection {
    /// A connection torn down by `teardown`.
    pub fn new(teardown: impl FnOnce() -> Result<(), SourceError> + 'static) -> Self {
        Self {
            teardown: Some(Box::new(teardown)),
        }
    }

    /// A connection with nothing to tear down (finished sources).
    pub fn empty() -> Self {
        Self { teardown: None }
    }

    /// A connection that releases an [`Observable`](super::Observable)
    /// subscription.
    pub fn from_subscription(subscription: Subscription) -> Self {
        Self::new(move || {
            drop(subscription);
            Ok(())
        })
    }

    /// Whether a teardown is still outstanding.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.teardown.is_some()
    }

    /// Disconnect now and surface any teardown failure.
    ///
    /// # Errors
    ///
    /// Whatever the source's teardown returned.
    pub fn unsubscribe(mut self) -> Result<(), SourceError> {
        match self.teardown.take() {
            Some(teardown) => teardown(),
            None => Ok(()),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(teardown) = self.teardown.take()
            && let Err(err) = teardown()
        {
            tracing::warn!(error = %err, "source teardown failed on drop");
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Anything a slot can be bound to.
pub trait Source<T> {
    /// Start delivering notifications to `sink`.
    fn connect(&self, sink: Sink<T>) -> Connection;
}

impl<T, S: Source<T> + ?Sized> Source<T> for Rc<S> {
    fn connect(&self, sink: Sink<T>) -> Connection {
        (**self).connect(sink)
    }
}

impl<T, S: Source<T> + ?Sized> Source<T> for Box<S> {
    fn connect(&self, sink: Sink<T>) -> Connection {
        (**self).connect(sink)
    }
}

/// An ad-hoc source built from a subscribe function.
pub struct FnSource<T, F> {
    subscribe: F,
    _marker: PhantomData<fn(T)>,
}

/// Build a source from a closure that receives a sink and returns the
/// connection tearing it down.
///
/// ```
/// use coalesce_runtime::reactive::{from_subscribe, Connection, Notification, Source};
/// use std::rc::Rc;
///
/// let ticks = from_subscribe(|sink| {
///     sink(Notification::Next(1));
///     sink(Notification::Next(2));
///     sink(Notification::Complete);
///     Connection::empty()
/// });
/// let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
/// let log = Rc::clone(&seen);
/// let _conn = ticks.connect(Rc::new(move |n: Notification<i32>| log.borrow_mut().push(n)));
/// assert_eq!(seen.borrow().len(), 3);
/// ```
pub fn from_subscribe<T, F>(subscribe: F) -> FnSource<T, F>
where
    F: Fn(Sink<T>) -> Connection,
{
    FnSource {
        subscribe,
        _marker: PhantomData,
    }
}

impl<T, F> Source<T> for FnSource<T, F>
where
    F: Fn(Sink<T>) -> Connection,
{
    fn connect(&self, sink: Sink<T>) -> Connection {
        (self.subscribe)(sink)
    }
}

impl<T, F> fmt::Debug for FnSource<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSource").finish_non_exhaustive()
    }
}

/// A plain synchronous value: delivers it once, then completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value<T>(pub T);

impl<T: Clone> Source<T> for Value<T> {
    fn connect(&self, sink: Sink<T>) -> Connection {
        sink(Notification::Next(self.0.clone()));
        sink(Notification::Complete);
        Connection::empty()
    }
}
