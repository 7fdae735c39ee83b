use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bus-wide configuration surface, mirrored one-to-one by external
/// configuration keys (`enable`, `identifier`, `async_enabled`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Gate consulted by wiring code; the bus itself does not read it.
    pub enable: bool,
    /// Short bus name used in every log line the bus emits.
    pub identifier: String,
    /// Whether wiring should build the pooled bus instead of the sync one.
    pub async_enabled: bool,
    /// Worker count for the dispatch pool of the pooled bus.
    pub async_workers: usize,
    /// Advisory ceiling per event type; crossing it logs a warning.
    pub max_subscribers_per_event: usize,
    pub delayed: DelayedConfig,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            enable: false,
            identifier: "default".to_string(),
            async_enabled: false,
            async_workers: 10,
            max_subscribers_per_event: 1_000,
            delayed: DelayedConfig::default(),
        }
    }
}

impl BusConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identifier.is_empty() {
            return Err(ConfigError::EmptyIdentifier);
        }
        if self.async_enabled && self.async_workers == 0 {
            return Err(ConfigError::ZeroWorkers("async_workers"));
        }
        self.delayed.validate()
    }
}

/// Settings for the delayed-publication scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayedConfig {
    pub enabled: bool,
    /// Number of timer workers backing the deadline heap.
    pub core_workers: usize,
    /// Timer threads are named `<prefix><n>`, `n` starting at 1.
    pub thread_name_prefix: String,
}

impl Default for DelayedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            core_workers: 2,
            thread_name_prefix: "delayed-event-".to_string(),
        }
    }
}

impl DelayedConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.core_workers == 0 {
            return Err(ConfigError::ZeroWorkers("delayed.core_workers"));
        }
        Ok(())
    }
}

/// Errors raised while validating a configuration value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("bus identifier must not be empty")]
    EmptyIdentifier,
    #[error("{0} must be at least 1")]
    ZeroWorkers(&'static str),
}
