//! Interceptor configuration.
//!
//! Settings come from code (builder) or from environment variables:
//!
//! | Variable | Values | Default |
//! |---|---|---|
//! | `TRAVERSE_TX_UNSUPPORTED_MANAGER` | `delegate`, `reject` | `delegate` |
//! | `TRAVERSE_TX_SEQUENTIAL_ADVISORY` | `true`, `false` | `true` |
//! | `TRAVERSE_TX_EMISSION_BUFFER` | integer > 0 | `16` |
//!
//! # Example
//!
//! ```
//! use traverse_tx_runtime::config::{InterceptorConfig, UnsupportedManagerPolicy};
//!
//! let config = InterceptorConfig::builder()
//!     .unsupported_manager(UnsupportedManagerPolicy::Reject)
//!     .emission_buffer(64)
//!     .build();
//!
//! assert!(config.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use traverse_tx_core::emission::DEFAULT_EMISSION_BUFFER;

/// Environment variable selecting the [`UnsupportedManagerPolicy`].
pub const ENV_UNSUPPORTED_MANAGER: &str = "TRAVERSE_TX_UNSUPPORTED_MANAGER";
/// Environment variable toggling the sequential-traversal advisory.
pub const ENV_SEQUENTIAL_ADVISORY: &str = "TRAVERSE_TX_SEQUENTIAL_ADVISORY";
/// Environment variable setting the emission channel capacity.
pub const ENV_EMISSION_BUFFER: &str = "TRAVERSE_TX_EMISSION_BUFFER";

/// Configuration error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable held a value that cannot be parsed
    #[error("Invalid value for {var}: {value}")]
    InvalidValue {
        /// The variable name
        var: String,
        /// The offending value
        value: String,
    },
    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// What to do with a lazy-returning method whose transaction manager cannot be
/// driven synchronously (or when no manager is configured at all).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnsupportedManagerPolicy {
    /// Log a warning and hand the call to the method-scoped interceptor.
    /// The transaction then ends when the method returns, not when the
    /// sequence is consumed.
    #[default]
    Delegate,
    /// Fail the call with `TransactionError::UnsupportedManager` before the
    /// target runs.
    Reject,
}

impl fmt::Display for UnsupportedManagerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delegate => write!(f, "delegate"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

impl FromStr for UnsupportedManagerPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "delegate" => Ok(Self::Delegate),
            "reject" => Ok(Self::Reject),
            _ => Err(ConfigError::InvalidValue {
                var: ENV_UNSUPPORTED_MANAGER.to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Interceptor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterceptorConfig {
    /// Handling of managers that cannot drive traversals
    pub unsupported_manager: UnsupportedManagerPolicy,
    /// Log the one-time sequential-traversal advisory
    pub sequential_advisory: bool,
    /// Channel capacity for emission-wrapped results
    pub emission_buffer: usize,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            unsupported_manager: UnsupportedManagerPolicy::Delegate,
            sequential_advisory: true,
            emission_buffer: DEFAULT_EMISSION_BUFFER,
        }
    }
}

impl InterceptorConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> InterceptorConfigBuilder {
        InterceptorConfigBuilder {
            config: Self::default(),
        }
    }

    /// Load from `TRAVERSE_TX_*` environment variables, defaulting unset ones.
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set to an unparsable value or the
    /// resulting configuration is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns error if a variable holds an unparsable value or the resulting
    /// configuration is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_UNSUPPORTED_MANAGER) {
            config.unsupported_manager = value.parse()?;
        }
        if let Some(value) = lookup(ENV_SEQUENTIAL_ADVISORY) {
            config.sequential_advisory =
                value.parse().map_err(|_| ConfigError::InvalidValue {
                    var: ENV_SEQUENTIAL_ADVISORY.to_string(),
                    value: value.clone(),
                })?;
        }
        if let Some(value) = lookup(ENV_EMISSION_BUFFER) {
            config.emission_buffer =
                value.parse().map_err(|_| ConfigError::InvalidValue {
                    var: ENV_EMISSION_BUFFER.to_string(),
                    value: value.clone(),
                })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.emission_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "emission_buffer must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`InterceptorConfig`].
#[derive(Debug, Clone)]
pub struct InterceptorConfigBuilder {
    config: InterceptorConfig,
}

impl InterceptorConfigBuilder {
    /// Set the unsupported-manager policy.
    #[must_use]
    pub const fn unsupported_manager(mut self, policy: UnsupportedManagerPolicy) -> Self {
        self.config.unsupported_manager = policy;
        self
    }

    /// Enable or disable the sequential-traversal advisory.
    #[must_use]
    pub const fn sequential_advisory(mut self, enabled: bool) -> Self {
        self.config.sequential_advisory = enabled;
        self
    }

    /// Set the emission channel capacity.
    #[must_use]
    pub const fn emission_buffer(mut self, buffer: usize) -> Self {
        self.config.emission_buffer = buffer;
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> InterceptorConfig {
        self.config
    }
}
