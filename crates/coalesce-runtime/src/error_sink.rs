#![forbid(unsafe_code)]

//! Routing of runtime errors away from the binding that raised them.
//!
//! Every [`ErrorReport`] goes to exactly one place, in this order of
//! precedence:
//!
//! 1. the sink's local handler ([`ErrorSink::with_handler`]),
//! 2. the process-wide handler ([`set_global_error_handler`]),
//! 3. the host's uncaught-error queue ([`EventLoop::raise_uncaught`]), which
//!    logs at `error` level on the next microtask drain.
//!
//! Errors are never re-raised into the caller that produced them and never
//! silently dropped.
//!
//! # Invariants
//!
//! 1. Independent errors are reported independently (no batching, no
//!    de-duplication).
//! 2. The global handler is read lock-free; swapping it while reports are in
//!    flight is safe.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::error::{ErrorContext, ErrorReport, RuntimeError};
use crate::host::EventLoop;

/// Handler signature shared by local and global handlers.
pub type ErrorHandler = dyn Fn(&ErrorReport);

struct GlobalHandler(Box<dyn Fn(&ErrorReport) + Send + Sync>);

static GLOBAL_HANDLER: ArcSwapOption<GlobalHandler> = ArcSwapOption::const_empty();

/// Install the process-wide error handler, replacing any previous one.
pub fn set_global_error_handler(handler: impl Fn(&ErrorReport) + Send + Sync + 'static) {
    GLOBAL_HANDLER.store(Some(Arc::new(GlobalHandler(Box::new(handler)))));
    tracing::debug!("global render error handler installed");
}

/// Remove the process-wide error handler.
pub fn clear_global_error_handler() {
    GLOBAL_HANDLER.store(None);
}

/// Whether a process-wide handler is installed.
#[must_use]
pub fn has_global_error_handler() -> bool {
    GLOBAL_HANDLER.load().is_some()
}

struct SinkInner {
    host: EventLoop,
    handler: Option<Rc<ErrorHandler>>,
    reported: Cell<u64>,
}

/// Forwards runtime errors to a handler. Clones share the same counters.
#[derive(Clone)]
pub struct ErrorSink {
    inner: Rc<SinkInner>,
}

impl ErrorSink {
    /// A sink that defers to the global handler, then to `host`.
    #[must_use]
    pub fn new(host: EventLoop) -> Self {
        Self {
            inner: Rc::new(SinkInner {
                host,
                handler: None,
                reported: Cell::new(0),
            }),
        }
    }

    /// A sink with its own handler, taking precedence over the global one.
    pub fn with_handler(host: EventLoop, handler: impl Fn(&ErrorReport) + 'static) -> Self {
        Self {
            inner: Rc::new(SinkInner {
                host,
                handler: Some(Rc::new(handler)),
                reported: Cell::new(0),
            }),
        }
    }

    /// Report one runtime error.
    pub fn report(&self, context: ErrorContext, error: RuntimeError) {
        self.inner.reported.set(self.inner.reported.get() + 1);
        let report = ErrorReport { context, error };

        if let Some(handler) = &self.inner.handler {
            tracing::warn!(context = %report.context, error = %report.error, "render error reported");
            handler(&report);
            return;
        }
        if let Some(global) = GLOBAL_HANDLER.load_full() {
            tracing::warn!(context = %report.context, error = %report.error, "render error reported to global handler");
            (global.0)(&report);
            return;
        }
        self.inner.host.raise_uncaught(report);
    }

    /// Number of errors reported through this sink.
    #[must_use]
    pub fn reported(&self) -> u64 {
        self.inner.reported.get()
    }
}

impl fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorSink")
            .field("local_handler", &self.inner.handler.is_some())
            .field("reported", &self.reported())
            .finish()
    }
}
