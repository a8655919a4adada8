//! # Engine Configuration Module
//!
//! Provides configuration management for the reconciliation engine.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct an
//! `EngineConfig` holding the settings every other crate reads at startup:
//! where the mapping/error/profile tables live, how logging is set up, which
//! record kinds a freshly connected integration mirrors by default, and how
//! instrumentation is emitted. Validation is fail-fast.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{EngineConfig, ProfileDefaults};
//!
//! let config = EngineConfig::builder()
//!     .database_url("sqlite:ledger-sync.db")
//!     .max_connections(8)
//!     .profile_defaults(ProfileDefaults::all_enabled().with_payments(false))
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::EngineConfig;
//!
//! // An empty database URL is rejected
//! let config = EngineConfig::builder()
//!     .database_url("")
//!     .build()
//!     .expect("Should fail - empty database url");
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use crate::logging::LoggingConfig;

/// Default database location used when the host does not provide one.
pub const DEFAULT_DATABASE_URL: &str = "sqlite::memory:";

/// Engine configuration.
///
/// Use [`EngineConfigBuilder`] to construct instances.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// SQLite connection URL for the mapping, error and profile tables
    pub database_url: String,

    /// Maximum number of pooled connections
    pub max_connections: u32,

    /// Logging setup applied by the service bootstrap
    pub logging: LoggingConfig,

    /// Per-kind enablement applied to lazily created sync profiles
    pub profile_defaults: ProfileDefaults,

    /// Emit `metrics` counters for write outcomes
    pub metrics_enabled: bool,

    /// Capacity of the reconciliation event bus
    pub event_buffer_size: usize,
}

/// Which record kinds a newly connected integration mirrors.
///
/// Stored onto the sync profile the first time a tenant connects; later
/// changes go through the profile store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileDefaults {
    pub customers: bool,
    pub invoices: bool,
    pub credit_notes: bool,
    pub payments: bool,
}

impl ProfileDefaults {
    /// Mirror every record kind.
    pub fn all_enabled() -> Self {
        Self {
            customers: true,
            invoices: true,
            credit_notes: true,
            payments: true,
        }
    }

    /// Mirror nothing until the tenant opts in.
    pub fn all_disabled() -> Self {
        Self {
            customers: false,
            invoices: false,
            credit_notes: false,
            payments: false,
        }
    }

    pub fn with_customers(mut self, enabled: bool) -> Self {
        self.customers = enabled;
        self
    }

    pub fn with_invoices(mut self, enabled: bool) -> Self {
        self.invoices = enabled;
        self
    }

    pub fn with_credit_notes(mut self, enabled: bool) -> Self {
        self.credit_notes = enabled;
        self
    }

    pub fn with_payments(mut self, enabled: bool) -> Self {
        self.payments = enabled;
        self
    }
}

impl Default for ProfileDefaults {
    fn default() -> Self {
        Self::all_enabled()
    }
}

impl EngineConfig {
    /// Creates a new builder for constructing an `EngineConfig`.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(Error::Config("Database URL cannot be empty".to_string()));
        }

        if self.max_connections == 0 {
            return Err(Error::Config(
                "Connection pool must allow at least one connection".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 5,
            logging: LoggingConfig::default(),
            profile_defaults: ProfileDefaults::default(),
            metrics_enabled: true,
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
        }
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    database_url: Option<String>,
    max_connections: Option<u32>,
    logging: Option<LoggingConfig>,
    profile_defaults: Option<ProfileDefaults>,
    metrics_enabled: Option<bool>,
    event_buffer_size: Option<usize>,
}

impl EngineConfigBuilder {
    /// Sets the SQLite connection URL (e.g. `sqlite:ledger-sync.db`).
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Sets the maximum number of pooled connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = Some(max);
        self
    }

    /// Sets the logging configuration.
    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Sets the per-kind defaults for new sync profiles.
    pub fn profile_defaults(mut self, defaults: ProfileDefaults) -> Self {
        self.profile_defaults = Some(defaults);
        self
    }

    /// Enables or disables `metrics` counters.
    pub fn metrics_enabled(mut self, enabled: bool) -> Self {
        self.metrics_enabled = Some(enabled);
        self
    }

    /// Sets the event bus capacity.
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when any setting is out of range.
    pub fn build(self) -> Result<EngineConfig> {
        let defaults = EngineConfig::default();

        let config = EngineConfig {
            database_url: self.database_url.unwrap_or(defaults.database_url),
            max_connections: self.max_connections.unwrap_or(defaults.max_connections),
            logging: self.logging.unwrap_or(defaults.logging),
            profile_defaults: self.profile_defaults.unwrap_or(defaults.profile_defaults),
            metrics_enabled: self.metrics_enabled.unwrap_or(defaults.metrics_enabled),
            event_buffer_size: self
                .event_buffer_size
                .unwrap_or(defaults.event_buffer_size),
        };

        config.validate()?;
        Ok(config)
    }
}
