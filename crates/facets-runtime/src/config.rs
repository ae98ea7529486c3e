#![forbid(unsafe_code)]

//! Runtime configuration.
//!
//! # Environment Variables
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `FACETS_PATTERN_CACHE_CAPACITY` | `256` | Parsed patterns kept in the LRU cache |
//! | `FACETS_DEFAULT_DISPATCH` | `same` | Dispatch policy when `ObserveOptions` leaves it unset |
//! | `FACETS_TRACE_NOTIFICATIONS` | `false` | Log every handler invocation at `debug` |
//!
//! Invalid values are reported through [`RuntimeConfigParse::errors`] and
//! the default is kept for that field.

use std::env;
use std::fmt;

const ENV_CACHE_CAPACITY: &str = "FACETS_PATTERN_CACHE_CAPACITY";
const ENV_DEFAULT_DISPATCH: &str = "FACETS_DEFAULT_DISPATCH";
const ENV_TRACE_NOTIFICATIONS: &str = "FACETS_TRACE_NOTIFICATIONS";

/// Settings for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub pattern_cache_capacity: usize,
    pub default_dispatch: String,
    pub trace_notifications: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pattern_cache_capacity: 256,
            default_dispatch: "same".to_string(),
            trace_notifications: false,
        }
    }
}

/// Configuration parse diagnostics (env + validation).
#[derive(Debug, Clone)]
pub struct RuntimeConfigParse {
    pub config: RuntimeConfig,
    pub errors: Vec<ConfigError>,
}

/// Configuration error with field context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub field: &'static str,
    pub value: String,
    pub message: String,
}

impl ConfigError {
    fn new(field: &'static str, value: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={} ({})", self.field, self.value, self.message)
    }
}

impl std::error::Error for ConfigError {}

impl RuntimeConfig {
    /// Parse config from environment variables.
    #[must_use]
    pub fn from_env() -> RuntimeConfig {
        Self::from_env_with_diagnostics().config
    }

    /// Parse config from environment variables and return diagnostics.
    #[must_use]
    pub fn from_env_with_diagnostics() -> RuntimeConfigParse {
        from_env_with(|key| env::var(key).ok())
    }

    /// Validate config constraints and return all violations.
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();
        if self.pattern_cache_capacity == 0 {
            errors.push(ConfigError::new(
                "pattern_cache_capacity",
                "0",
                "must be >= 1",
            ));
        }
        if self.default_dispatch.trim().is_empty() {
            errors.push(ConfigError::new(
                "default_dispatch",
                self.default_dispatch.clone(),
                "must name a dispatch policy",
            ));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn from_env_with<F>(mut get: F) -> RuntimeConfigParse
where
    F: FnMut(&str) -> Option<String>,
{
    let mut config = RuntimeConfig::default();
    let mut errors = Vec::new();

    if let Some(value) = get(ENV_CACHE_CAPACITY) {
        match value.trim().parse::<usize>() {
            Ok(parsed) if parsed > 0 => config.pattern_cache_capacity = parsed,
            _ => errors.push(ConfigError::new(
                "pattern_cache_capacity",
                value,
                "expected positive integer",
            )),
        }
    }

    if let Some(value) = get(ENV_DEFAULT_DISPATCH) {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            errors.push(ConfigError::new(
                "default_dispatch",
                value,
                "expected a dispatch name",
            ));
        } else {
            config.default_dispatch = trimmed.to_string();
        }
    }

    if let Some(value) = get(ENV_TRACE_NOTIFICATIONS) {
        match parse_bool(&value) {
            Some(parsed) => config.trace_notifications = parsed,
            None => errors.push(ConfigError::new(
                "trace_notifications",
                value,
                "expected bool (1/0/true/false)",
            )),
        }
    }

    if let Err(mut validation) = config.validate() {
        errors.append(&mut validation);
    }

    RuntimeConfigParse { config, errors }
}

#[inline]
fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
