#![forbid(unsafe_code)]

//! Coalescing render-strategy scheduler.
//!
//! Reactive sources feed named slots of a [`RenderBinding`]; a
//! [`CoalescingScheduler`] decides when the binding's commit callback runs,
//! under a pluggable [`RenderStrategy`] picked from a [`StrategyRegistry`].
//! All slot updates inside one scheduling window collapse into one commit
//! carrying the latest value of every slot.
//!
//! ```text
//! source ──► SubscriptionManager ──► CoalescingScheduler ──► commit callback
//!                    │                                              │
//!                    └────────────► ErrorSink ◄─────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`host`]: the reference single-threaded [`EventLoop`] and its timing
//!   sources (microtasks, frames, idle windows, timeouts).
//! - [`strategy`]: the [`RenderStrategy`] trait and the built-in strategies.
//! - [`registry`]: named strategies and the configured primary.
//! - [`scheduler`]: per-binding pending commits and coalescing.
//! - [`reactive`]: source shapes and the [`Source`] normalization trait.
//! - [`subscription`]: slot state, error policy, [`CommitContext`].
//! - [`binding`]: binding lifecycle, [`BindingHandle`], [`BindingScope`].
//! - [`error_sink`]: routing of runtime errors.
//! - [`config`]: [`StrategyConfig`], loadable from TOML/JSON with the
//!   `policy-config` feature.

pub mod binding;
pub mod config;
pub mod error;
pub mod error_sink;
pub mod host;
pub mod reactive;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod strategy;
pub mod subscription;

pub use binding::{
    BindingHandle, BindingOptions, BindingScope, BindingState, MAX_REENTRANT_COMMITS,
    RenderBinding, ScopedBinding, SlotSources,
};
pub use config::{ConfigError, StrategyConfig};
pub use error::{
    CommitError, ErrorContext, ErrorReport, Phase, RegistryError, RuntimeError, SourceError,
};
pub use error_sink::{
    ErrorSink, clear_global_error_handler, has_global_error_handler, set_global_error_handler,
};
pub use host::{Clock, EventLoop, ManualClock, SystemClock, TimingSource};
pub use reactive::{
    Connection, Notification, Observable, Promise, Resolver, Sink, Source, Subject, Value,
    from_subscribe,
};
pub use registry::{RegistryBuilder, StrategyRegistry};
pub use runtime::{RenderRuntime, RuntimeBuilder};
pub use scheduler::{CoalescingScheduler, CommitTarget, SchedulerStats};
pub use strategy::{
    Behavior, BindingId, Coalescing, DEFAULT_IDLE_DEADLINE, RenderStrategy, ScheduleHandle,
    StrategyRef, Work,
};
pub use subscription::{CommitContext, ErrorPolicy, SlotStatus, SlotView, SubscriptionManager};
