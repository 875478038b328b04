#![forbid(unsafe_code)]

//! Hot multicast streams.
//!
//! A [`Subject`] pushes values to every connected sink. Once it errors or
//! completes it is closed: further `next` calls are ignored and late
//! subscribers receive the terminal notification immediately.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::SourceError;

use super::source::{Connection, Notification, Sink, Source};

#[derive(Clone)]
enum Terminal {
    Error(SourceError),
    Complete,
}

impl Terminal {
    fn notification<T>(&self) -> Notification<T> {
        match self {
            Self::Error(err) => Notification::Error(err.clone()),
            Self::Complete => Notification::Complete,
        }
    }
}

struct SubjectState<T> {
    next_id: u64,
    observers: Vec<(u64, Sink<T>)>,
    terminal: Option<Terminal>,
}

/// A hot stream with explicit `next` / `error` / `complete`.
pub struct Subject<T> {
    state: Rc<RefCell<SubjectState<T>>>,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T> Default for Subject<T> {
    fn default() -> Self {
        Self {
            state: Rc::new(RefCell::new(SubjectState {
                next_id: 0,
                observers: Vec::new(),
                terminal: None,
            })),
        }
    }
}

impl<T> fmt::Debug for Subject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Subject")
            .field("observers", &state.observers.len())
            .field("closed", &state.terminal.is_some())
            .finish()
    }
}

impl<T: Clone + 'static> Subject<T> {
    /// An open subject with no observers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a value to every observer. Ignored once closed.
    pub fn next(&self, value: T) {
        let observers = {
            let state = self.state.borrow();
            if state.terminal.is_some() {
                return;
            }
            state.observers.iter().map(|(_, s)| Rc::clone(s)).collect::<Vec<_>>()
        };
        for sink in observers {
            sink(Notification::Next(value.clone()));
        }
    }

    /// Fail the stream.
    pub fn error(&self, error: SourceError) {
        self.close(Terminal::Error(error));
    }

    /// Finish the stream.
    pub fn complete(&self) {
        self.close(Terminal::Complete);
    }

    /// Number of connected observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.state.borrow().observers.len()
    }

    /// Whether the stream has errored or completed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.borrow().terminal.is_some()
    }

    fn close(&self, terminal: Terminal) {
        let observers = {
            let mut state = self.state.borrow_mut();
            if state.terminal.is_some() {
                return;
            }
            state.terminal = Some(terminal.clone());
            std::mem::take(&mut state.observers)
        };
        for (_, sink) in observers {
            sink(terminal.notification());
        }
    }
}

impl<T: Clone + 'static> Source<T> for Subject<T> {
    fn connect(&self, sink: Sink<T>) -> Connection {
        let id = {
            let mut state = self.state.borrow_mut();
            if let Some(terminal) = state.terminal.clone() {
                drop(state);
                sink(terminal.notification());
                return Connection::empty();
            }
            state.next_id += 1;
            let id = state.next_id;
            state.observers.push((id, sink));
            id
        };
        let state: Weak<RefCell<SubjectState<T>>> = Rc::downgrade(&self.state);
        Connection::new(move || {
            if let Some(state) = state.upgrade() {
                state.borrow_mut().observers.retain(|(other, _)| *other != id);
            }
            Ok(())
        })
    }
}
