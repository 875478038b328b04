#![forbid(unsafe_code)]

//! Scheduler configuration.
//!
//! [`StrategyConfig`] names the primary strategy, the idle strategy's
//! forced-flush deadline, and the default error policy for new bindings.
//! Values are sanitized before use: an empty primary name counts as "not
//! configured", and a zero or absurd idle deadline falls back to
//! [`DEFAULT_IDLE_DEADLINE`].
//!
//! With the `policy-config` feature the configuration can be loaded from TOML
//! or JSON:
//!
//! ```toml
//! primary_strategy = "global"
//! idle_deadline_ms = 250
//! error_policy = "suppress-until-replaced"
//! ```

use std::fmt;
use std::time::Duration;

use crate::strategy::DEFAULT_IDLE_DEADLINE;
use crate::subscription::ErrorPolicy;

/// Upper bound accepted for the idle deadline (10 minutes).
pub const MAX_IDLE_DEADLINE: Duration = Duration::from_secs(600);

/// Configuration for the strategy registry and new bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "policy-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct StrategyConfig {
    /// Name of the strategy used when a binding does not pick one.
    /// Default: `"local"`.
    pub primary_strategy: Option<String>,

    /// Forced-flush deadline of the `idle` strategy, in milliseconds.
    /// Default: 1000.
    pub idle_deadline_ms: u64,

    /// Error policy applied to bindings that do not choose their own.
    /// Default: [`ErrorPolicy::KeepLastValue`].
    pub error_policy: ErrorPolicy,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            primary_strategy: Some("local".to_owned()),
            idle_deadline_ms: DEFAULT_IDLE_DEADLINE.as_millis() as u64,
            error_policy: ErrorPolicy::default(),
        }
    }
}

impl StrategyConfig {
    /// Use `name` as the primary strategy.
    #[must_use]
    pub fn with_primary(mut self, name: impl Into<String>) -> Self {
        self.primary_strategy = Some(name.into());
        self
    }

    /// Set the idle strategy's forced-flush deadline.
    #[must_use]
    pub fn with_idle_deadline(mut self, deadline: Duration) -> Self {
        self.idle_deadline_ms = deadline.as_millis().min(u128::from(u64::MAX)) as u64;
        self
    }

    /// Set the default error policy.
    #[must_use]
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// The primary strategy name, if one is configured.
    #[must_use]
    pub fn primary(&self) -> Option<&str> {
        self.primary_strategy
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    /// The sanitized idle deadline.
    #[must_use]
    pub fn idle_deadline(&self) -> Duration {
        let deadline = Duration::from_millis(self.idle_deadline_ms);
        if deadline.is_zero() || deadline > MAX_IDLE_DEADLINE {
            DEFAULT_IDLE_DEADLINE
        } else {
            deadline
        }
    }

    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] when the document is malformed.
    #[cfg(feature = "policy-config")]
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        toml::from_str(input).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Parse a JSON document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] when the document is malformed.
    #[cfg(feature = "policy-config")]
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(input).map_err(|err| ConfigError::Parse(err.to_string()))
    }
}

/// Errors from loading configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The document could not be parsed.
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(msg) => write!(f, "invalid strategy config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
