#![forbid(unsafe_code)]

//! Reactive sources that can feed binding slots.
//!
//! Every shape a slot accepts implements [`Source`], which normalizes it to
//! "value arrives zero or many times, possibly followed by completion or
//! error":
//!
//! - [`Observable`]: a shared, version-tracked value cell. Delivers its
//!   current value on connect, then every change. Never completes.
//! - [`Subject`]: a hot stream driven by `next` / `error` / `complete`.
//! - [`Promise`]: resolves or rejects exactly once via its [`Resolver`].
//! - [`Value`]: a plain synchronous value (one `Next`, then `Complete`).
//! - [`from_subscribe`]: any ad-hoc subscribe function returning a
//!   [`Connection`] whose teardown may fail.
//!
//! # Architecture
//!
//! All shapes use `Rc<RefCell<..>>` for single-threaded shared ownership and
//! release their borrows before calling into sinks, so a sink may reconnect,
//! disconnect or push new values re-entrantly.

pub mod observable;
pub mod promise;
pub mod source;
pub mod subject;

pub use observable::{Observable, Subscription};
pub use promise::{Promise, Resolver};
pub use source::{Connection, FnSource, Notification, Sink, Source, Value, from_subscribe};
pub use subject::Subject;
