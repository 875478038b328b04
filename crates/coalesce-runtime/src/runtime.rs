#![forbid(unsafe_code)]

//! The shared context bindings are created in.
//!
//! A [`RenderRuntime`] ties together the host loop, the strategy registry,
//! the scheduler (whose pending map is the only state shared between
//! bindings), the error sink, and the binding id counter. Clones share
//! everything.
//!
//! Applications normally build one runtime at startup and
//! [`install`](RenderRuntime::install) it; code far from the setup reaches
//! it through [`RenderRuntime::global`]. Tests build their own through
//! [`RenderRuntime::builder`] and never touch the installed one.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::config::StrategyConfig;
use crate::error::RegistryError;
use crate::error_sink::ErrorSink;
use crate::host::EventLoop;
use crate::registry::StrategyRegistry;
use crate::scheduler::CoalescingScheduler;
use crate::strategy::BindingId;
use crate::subscription::ErrorPolicy;

thread_local! {
    static GLOBAL_RUNTIME: RefCell<Option<RenderRuntime>> = const { RefCell::new(None) };
}

struct RuntimeInner {
    host: EventLoop,
    registry: StrategyRegistry,
    scheduler: CoalescingScheduler,
    errors: ErrorSink,
    default_policy: ErrorPolicy,
    next_binding: Cell<u64>,
}

/// Registry, scheduler and error sink shared by a family of bindings.
#[derive(Clone)]
pub struct RenderRuntime {
    inner: Rc<RuntimeInner>,
}

impl RenderRuntime {
    /// Built-in strategies on `host`, configured by `config`.
    ///
    /// # Errors
    ///
    /// Any [`RegistryError`] from assembling the registry, typically a
    /// missing or unknown primary strategy.
    pub fn from_config(host: EventLoop, config: &StrategyConfig) -> Result<Self, RegistryError> {
        let registry = StrategyRegistry::with_builtins(&host, config)?;
        Ok(Self::builder(host, registry)
            .error_policy(config.error_policy)
            .build())
    }

    /// Start from an already built registry.
    #[must_use]
    pub fn builder(host: EventLoop, registry: StrategyRegistry) -> RuntimeBuilder {
        RuntimeBuilder {
            host,
            registry,
            scheduler: None,
            errors: None,
            default_policy: ErrorPolicy::default(),
        }
    }

    /// Host event loop.
    #[must_use]
    pub fn host(&self) -> &EventLoop {
        &self.inner.host
    }

    /// Strategy registry.
    #[must_use]
    pub fn registry(&self) -> &StrategyRegistry {
        &self.inner.registry
    }

    /// Scheduler shared by every binding of this runtime.
    #[must_use]
    pub fn scheduler(&self) -> &CoalescingScheduler {
        &self.inner.scheduler
    }

    /// Error sink shared by every binding of this runtime.
    #[must_use]
    pub fn errors(&self) -> &ErrorSink {
        &self.inner.errors
    }

    /// Error policy for bindings that do not choose their own.
    #[must_use]
    pub fn default_policy(&self) -> ErrorPolicy {
        self.inner.default_policy
    }

    /// Make this runtime the thread's shared one, returning the runtime it
    /// replaces.
    pub fn install(&self) -> Option<RenderRuntime> {
        let previous = GLOBAL_RUNTIME.with(|slot| slot.borrow_mut().replace(self.clone()));
        tracing::debug!(replaced = previous.is_some(), "render runtime installed");
        previous
    }

    /// The runtime installed on this thread, if any.
    #[must_use]
    pub fn global() -> Option<RenderRuntime> {
        GLOBAL_RUNTIME.with(|slot| slot.borrow().clone())
    }

    /// Remove the installed runtime. Bindings created from it keep working.
    pub fn uninstall() -> Option<RenderRuntime> {
        GLOBAL_RUNTIME.with(|slot| slot.borrow_mut().take())
    }

    /// Whether both handles share the same runtime.
    #[must_use]
    pub fn same_runtime(&self, other: &RenderRuntime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn next_binding_id(&self) -> BindingId {
        let id = self.inner.next_binding.get() + 1;
        self.inner.next_binding.set(id);
        BindingId::from_raw(id)
    }
}

impl fmt::Debug for RenderRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderRuntime")
            .field("registry", &self.inner.registry)
            .field("scheduler", &self.inner.scheduler)
            .field("bindings_created", &self.inner.next_binding.get())
            .finish()
    }
}

/// Assembles a [`RenderRuntime`], optionally with an injected scheduler or
/// error sink.
pub struct RuntimeBuilder {
    host: EventLoop,
    registry: StrategyRegistry,
    scheduler: Option<CoalescingScheduler>,
    errors: Option<ErrorSink>,
    default_policy: ErrorPolicy,
}

impl RuntimeBuilder {
    /// Use `scheduler` instead of a fresh one.
    #[must_use]
    pub fn scheduler(mut self, scheduler: CoalescingScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Use `errors` instead of a sink that defers to the global handler.
    #[must_use]
    pub fn error_sink(mut self, errors: ErrorSink) -> Self {
        self.errors = Some(errors);
        self
    }

    /// Default error policy for new bindings.
    #[must_use]
    pub fn error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// Finish.
    #[must_use]
    pub fn build(self) -> RenderRuntime {
        let errors = self
            .errors
            .unwrap_or_else(|| ErrorSink::new(self.host.clone()));
        RenderRuntime {
            inner: Rc::new(RuntimeInner {
                host: self.host,
                registry: self.registry,
                scheduler: self.scheduler.unwrap_or_default(),
                errors,
                default_policy: self.default_policy,
                next_binding: Cell::new(0),
            }),
        }
    }
}

impl fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("registry", &self.registry)
            .field("default_policy", &self.default_policy)
            .finish_non_exhaustive()
    }
}
