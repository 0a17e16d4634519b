//! # Dispatch Configuration System
//!
//! Layered configuration for the dispatch saga. Values come from built-in
//! defaults, then `config/dispatch.toml`, then `config/dispatch.{env}.toml`,
//! then `DISPATCH__SECTION__KEY` environment variables.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dispatch_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let poll_interval = manager.config().polling.interval();
//! let lock_ttl = manager.config().locking.driver_lock_ttl();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `config/dispatch.toml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Solver polling cadence and overall saga deadline
    pub polling: PollingConfig,

    /// Retry budget for transient handler failures on ordinary steps
    pub retry: RetryConfig,

    /// Retry budget for lock release compensation
    pub compensation: CompensationConfig,

    /// Command invocation settings
    pub invoker: InvokerConfig,

    /// Driver reservation settings
    pub locking: LockingConfig,

    /// Parameters forwarded to the clustering handler
    pub clustering: ClusteringConfig,

    /// Lifecycle event channel settings
    pub events: EventsConfig,

    /// Postgres-backed stores
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Wait between `queryDispatch` calls
    pub interval_ms: u64,
    /// Deadline for a whole cluster execution
    pub execution_timeout_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            execution_timeout_ms: 3_600_000,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            multiplier: 2.0,
            max_delay_ms: 5_000,
        }
    }
}

/// Same shape as [`RetryConfig`] with a much larger budget: a lock that is
/// never released blocks its driver until the TTL runs out.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompensationConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for CompensationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InvokerConfig {
    /// Per-command handler timeout
    pub command_timeout_ms: u64,
    /// Keep a bounded history of invocations for debugging
    pub enable_history: bool,
    pub max_history_size: usize,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 30_000,
            enable_history: false,
            max_history_size: 1_000,
        }
    }
}

impl InvokerConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LockingConfig {
    /// A driver lock older than this is treated as released
    pub driver_lock_ttl_seconds: u64,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            driver_lock_ttl_seconds: 900,
        }
    }
}

impl LockingConfig {
    pub fn driver_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.driver_lock_ttl_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Smaller bias produces more, smaller clusters
    pub bias: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self { bias: 1.0 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/dispatch_development".to_string(),
            max_connections: 10,
        }
    }
}

impl DispatchConfig {
    /// Reject values that would make the saga spin, never retry, or never poll
    pub fn validate(&self) -> ConfigResult<()> {
        if self.polling.interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "polling.interval_ms",
                self.polling.interval_ms,
                "must be greater than zero",
            ));
        }
        if self.polling.interval_ms >= self.polling.execution_timeout_ms {
            return Err(ConfigurationError::invalid_value(
                "polling.execution_timeout_ms",
                self.polling.execution_timeout_ms,
                "must be greater than polling.interval_ms",
            ));
        }
        Self::validate_budget(
            "retry",
            self.retry.max_attempts,
            self.retry.multiplier,
        )?;
        Self::validate_budget(
            "compensation",
            self.compensation.max_attempts,
            self.compensation.multiplier,
        )?;
        if self.invoker.command_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "invoker.command_timeout_ms",
                0,
                "must be greater than zero",
            ));
        }
        if self.locking.driver_lock_ttl_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "locking.driver_lock_ttl_seconds",
                0,
                "must be greater than zero",
            ));
        }
        if !(self.clustering.bias.is_finite() && self.clustering.bias > 0.0) {
            return Err(ConfigurationError::invalid_value(
                "clustering.bias",
                self.clustering.bias,
                "must be a positive finite number",
            ));
        }
        if self.events.channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "events.channel_capacity",
                0,
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    fn validate_budget(section: &str, max_attempts: u32, multiplier: f64) -> ConfigResult<()> {
        if max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                format!("{section}.max_attempts"),
                max_attempts,
                "at least one attempt is required",
            ));
        }
        if !(multiplier >= 1.0) {
            return Err(ConfigurationError::invalid_value(
                format!("{section}.multiplier"),
                multiplier,
                "must be at least 1.0",
            ));
        }
        Ok(())
    }

    /// Configuration tuned for tests: millisecond polling, no real backoff
    pub fn for_testing() -> Self {
        Self {
            polling: PollingConfig {
                interval_ms: 5,
                execution_timeout_ms: 5_000,
            },
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 1,
                multiplier: 1.0,
                max_delay_ms: 1,
            },
            compensation: CompensationConfig {
                max_attempts: 5,
                base_delay_ms: 1,
                multiplier: 1.0,
                max_delay_ms: 1,
            },
            invoker: InvokerConfig {
                command_timeout_ms: 1_000,
                enable_history: true,
                max_history_size: 500,
            },
            ..Self::default()
        }
    }
}
