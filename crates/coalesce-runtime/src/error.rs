#![forbid(unsafe_code)]

//! Error taxonomy for the render scheduler.
//!
//! Configuration errors ([`RegistryError`]) surface synchronously to whoever
//! assembles the strategy registry. Runtime errors ([`RuntimeError`]) happen
//! on live bindings; they are never returned to unrelated callers and are
//! always routed through the [`ErrorSink`](crate::error_sink::ErrorSink)
//! together with an [`ErrorContext`].
//!
//! # Failure Modes
//!
//! | Error | Raised by | Effect on the binding |
//! |-------|-----------|-----------------------|
//! | `DuplicateStrategy` | registry setup | none (setup fails) |
//! | `UnknownStrategy` | registry lookup | binding is not created |
//! | `NoDefaultStrategy` | registry setup | none (setup fails) |
//! | `SourceEmission` | a slot source | slot errored, policy decides commits |
//! | `Commit` | the commit callback | binding stays active |
//! | `Teardown` | an unsubscribe | remaining teardown steps still run |

use std::error::Error;
use std::fmt;
use std::rc::Rc;

use crate::strategy::BindingId;

/// Errors raised while assembling or querying the strategy registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A strategy with this name was already registered.
    DuplicateStrategy(String),
    /// No strategy with this name exists.
    UnknownStrategy(String),
    /// The configuration did not name a primary strategy.
    NoDefaultStrategy,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateStrategy(name) => {
                write!(f, "render strategy '{name}' is already registered")
            }
            Self::UnknownStrategy(name) => write!(f, "unknown render strategy '{name}'"),
            Self::NoDefaultStrategy => write!(f, "no primary render strategy configured"),
        }
    }
}

impl Error for RegistryError {}

/// Plain-message error used when a caller only has text to report.
#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for Message {}

/// A failure produced by a slot source, either while emitting or while
/// being unsubscribed.
///
/// Cheap to clone: the slot keeps one copy as its `last_error` while another
/// travels to the error sink.
#[derive(Clone)]
pub struct SourceError {
    inner: Rc<dyn Error + 'static>,
}

impl SourceError {
    /// Wrap an arbitrary error.
    pub fn new<E: Error + 'static>(error: E) -> Self {
        Self {
            inner: Rc::new(error),
        }
    }

    /// Create an error from a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(Message(message.into()))
    }

    /// The wrapped error.
    #[must_use]
    pub fn inner(&self) -> &(dyn Error + 'static) {
        &*self.inner
    }
}

impl fmt::Debug for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SourceError")
            .field(&self.inner.to_string())
            .finish()
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.inner, f)
    }
}

/// Two source errors are equal when they render the same message.
impl PartialEq for SourceError {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner) || self.to_string() == other.to_string()
    }
}

impl Error for SourceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.source()
    }
}

/// A failure returned by a binding's commit callback.
#[derive(Clone)]
pub struct CommitError {
    inner: Rc<dyn Error + 'static>,
}

impl CommitError {
    /// Wrap an arbitrary error.
    pub fn new<E: Error + 'static>(error: E) -> Self {
        Self {
            inner: Rc::new(error),
        }
    }

    /// Create an error from a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(Message(message.into()))
    }
}

impl fmt::Debug for CommitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CommitError")
            .field(&self.inner.to_string())
            .finish()
    }
}

impl fmt::Display for CommitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.inner, f)
    }
}

impl Error for CommitError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.source()
    }
}

/// Errors that occur on a live binding and are reported to the error sink.
#[derive(Debug, Clone)]
pub enum RuntimeError {
    /// A slot source failed.
    SourceEmission(SourceError),
    /// The commit callback failed.
    Commit(CommitError),
    /// Unsubscribing a slot source failed.
    Teardown(SourceError),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceEmission(err) => write!(f, "source emission failed: {err}"),
            Self::Commit(err) => write!(f, "commit failed: {err}"),
            Self::Teardown(err) => write!(f, "teardown failed: {err}"),
        }
    }
}

impl Error for RuntimeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::SourceEmission(err) | Self::Teardown(err) => Some(err),
            Self::Commit(err) => Some(err),
        }
    }
}

/// Lifecycle phase in which a runtime error happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Connecting a source to its slot.
    Subscribe,
    /// A connected source delivered an error.
    Emission,
    /// Running the commit callback.
    Commit,
    /// Unsubscribing a source (replacement or destroy).
    Teardown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subscribe => write!(f, "subscribe"),
            Self::Emission => write!(f, "emission"),
            Self::Commit => write!(f, "commit"),
            Self::Teardown => write!(f, "teardown"),
        }
    }
}

/// Identifies where a runtime error came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ErrorContext {
    /// The binding that owns the failing slot or callback.
    pub binding: BindingId,
    /// The slot name, when the error is slot-scoped.
    pub slot: Option<String>,
    /// Lifecycle phase.
    pub phase: Phase,
}

impl ErrorContext {
    /// Context for a binding-level error.
    #[must_use]
    pub fn binding(binding: BindingId, phase: Phase) -> Self {
        Self {
            binding,
            slot: None,
            phase,
        }
    }

    /// Context for a slot-level error.
    #[must_use]
    pub fn slot(binding: BindingId, slot: impl Into<String>, phase: Phase) -> Self {
        Self {
            binding,
            slot: Some(slot.into()),
            phase,
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.slot {
            Some(slot) => write!(f, "{} slot '{slot}' during {}", self.binding, self.phase),
            None => write!(f, "{} during {}", self.binding, self.phase),
        }
    }
}

/// A runtime error together with where it happened.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    /// Where the error came from.
    pub context: ErrorContext,
    /// What went wrong.
    pub error: RuntimeError,
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.context, self.error)
    }
}
