#![forbid(unsafe_code)]

//! Named render strategies and the configured primary strategy.
//!
//! The registry is assembled once through a [`RegistryBuilder`] and is
//! read-only afterwards: there is no removal and no re-registration. Built-in
//! strategies are registered by [`StrategyRegistry::builtins`]; custom
//! strategies may be added to the same builder before it is built.
//!
//! # Failure Modes
//!
//! | Condition | Error |
//! |-----------|-------|
//! | Name registered twice | [`RegistryError::DuplicateStrategy`] |
//! | Lookup of a missing name | [`RegistryError::UnknownStrategy`] |
//! | No primary configured | [`RegistryError::NoDefaultStrategy`] |
//! | Primary names a missing strategy | [`RegistryError::UnknownStrategy`] |

use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;

use crate::config::StrategyConfig;
use crate::error::RegistryError;
use crate::host::EventLoop;
use crate::strategy::{
    GlobalStrategy, IdleStrategy, ImmediateStrategy, LocalStrategy, NoopStrategy, RenderStrategy,
    StrategyRef,
};

/// Registry names of the built-in strategies.
pub mod names {
    /// Synchronous, non-coalescing.
    pub const NATIVE: &str = "native";
    /// Alias of [`NATIVE`].
    pub const IMMEDIATE: &str = "immediate";
    /// Per-binding coalescing on microtasks.
    pub const LOCAL: &str = "local";
    /// Cross-binding coalescing, one flush per frame.
    pub const GLOBAL: &str = "global";
    /// Idle-window flush with a forced deadline.
    pub const IDLE: &str = "idle";
    /// Triggers recorded, never committed.
    pub const NOOP: &str = "noop";
}

/// Collects strategies before the registry is frozen.
#[derive(Default)]
pub struct RegistryBuilder {
    strategies: Vec<StrategyRef>,
    primary: Option<String>,
}

impl RegistryBuilder {
    /// An empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `strategy` under `name`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateStrategy`] if the name is taken.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        strategy: impl RenderStrategy + 'static,
    ) -> Result<&mut Self, RegistryError> {
        self.register_shared(name, Rc::new(strategy))
    }

    /// Register an already shared strategy (e.g. one the caller keeps a
    /// handle to for inspection).
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateStrategy`] if the name is taken.
    pub fn register_shared(
        &mut self,
        name: impl Into<String>,
        strategy: Rc<dyn RenderStrategy>,
    ) -> Result<&mut Self, RegistryError> {
        let name = name.into();
        if self.strategies.iter().any(|s| s.name() == name) {
            return Err(RegistryError::DuplicateStrategy(name));
        }
        tracing::debug!(strategy = %name, "render strategy registered");
        self.strategies.push(StrategyRef::new(name, strategy));
        Ok(self)
    }

    /// Name the primary strategy. `None` clears it.
    pub fn primary(&mut self, name: Option<&str>) -> &mut Self {
        self.primary = name.map(str::to_owned);
        self
    }

    /// Freeze the registry.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NoDefaultStrategy`] without a primary name, and
    /// [`RegistryError::UnknownStrategy`] when the primary is not registered.
    pub fn build(self) -> Result<StrategyRegistry, RegistryError> {
        let primary_name = self.primary.ok_or(RegistryError::NoDefaultStrategy)?;
        let primary = self
            .strategies
            .iter()
            .find(|s| s.name() == primary_name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownStrategy(primary_name.clone()))?;
        let order: Vec<Rc<str>> = self.strategies.iter().map(|s| Rc::from(s.name())).collect();
        let strategies = self
            .strategies
            .into_iter()
            .map(|s| (s.name().to_owned(), s))
            .collect();
        tracing::debug!(primary = %primary_name, count = order.len(), "strategy registry built");
        Ok(StrategyRegistry {
            strategies,
            order,
            primary,
        })
    }
}

impl fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field(
                "strategies",
                &self.strategies.iter().map(StrategyRef::name).collect::<Vec<_>>(),
            )
            .field("primary", &self.primary)
            .finish()
    }
}

/// Read-only set of named strategies with one primary.
pub struct StrategyRegistry {
    strategies: AHashMap<String, StrategyRef>,
    order: Vec<Rc<str>>,
    primary: StrategyRef,
}

impl StrategyRegistry {
    /// Start an empty builder.
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// A builder pre-loaded with the built-in strategies wired to `host`,
    /// with the primary taken from `config`.
    #[must_use]
    pub fn builtins(host: &EventLoop, config: &StrategyConfig) -> RegistryBuilder {
        let mut builder = RegistryBuilder::new();
        let builtins: [(&str, Rc<dyn RenderStrategy>); 6] = [
            (names::NATIVE, Rc::new(ImmediateStrategy::new())),
            (names::IMMEDIATE, Rc::new(ImmediateStrategy::new())),
            (names::LOCAL, Rc::new(LocalStrategy::new(host.microtasks()))),
            (names::GLOBAL, Rc::new(GlobalStrategy::new(host.frames()))),
            (
                names::IDLE,
                Rc::new(IdleStrategy::new(
                    host.idle(),
                    host.timeout(config.idle_deadline()),
                )),
            ),
            (names::NOOP, Rc::new(NoopStrategy::new())),
        ];
        for (name, strategy) in builtins {
            builder.strategies.push(StrategyRef::new(name, strategy));
        }
        builder.primary(config.primary());
        builder
    }

    /// Built-in strategies only.
    ///
    /// # Errors
    ///
    /// See [`RegistryBuilder::build`].
    pub fn with_builtins(host: &EventLoop, config: &StrategyConfig) -> Result<Self, RegistryError> {
        Self::builtins(host, config).build()
    }

    /// Look up a strategy by name.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownStrategy`] if absent.
    pub fn get(&self, name: &str) -> Result<StrategyRef, RegistryError> {
        self.strategies
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownStrategy(name.to_owned()))
    }

    /// The primary strategy.
    #[must_use]
    pub fn get_default(&self) -> StrategyRef {
        self.primary.clone()
    }

    /// Look up `name`, or the primary when `None`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownStrategy`] if a name is given but absent.
    pub fn resolve(&self, name: Option<&str>) -> Result<StrategyRef, RegistryError> {
        match name {
            Some(name) => self.get(name),
            None => Ok(self.get_default()),
        }
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|n| &**n)
    }

    /// Number of registered strategies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the registry is empty (never true for a built registry).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &self.order)
            .field("primary", &self.primary.name())
            .finish()
    }
}
