//! Pipeline configuration.
//!
//! Every pipeline carries a [`PipelineConfig`]. Defaults suit interactive
//! use; values can be set in code, parsed from JSON, or read from
//! `STATEPIPE_*` environment variables.
//!
//! # Example
//!
//! ```
//! use statepipe_runtime::PipelineConfig;
//! use std::time::Duration;
//!
//! let config = PipelineConfig::default()
//!     .with_grace_period(Duration::from_secs(2))
//!     .with_max_concurrency(16);
//!
//! assert!(config.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Environment variable for the grace period, in milliseconds
pub const ENV_GRACE_PERIOD_MS: &str = "STATEPIPE_GRACE_PERIOD_MS";

/// Environment variable for the in-flight event limit
pub const ENV_MAX_CONCURRENCY: &str = "STATEPIPE_MAX_CONCURRENCY";

/// Environment variable for the effect buffer size
pub const ENV_EFFECT_BUFFER: &str = "STATEPIPE_EFFECT_BUFFER";

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A value failed validation
    #[error("Configuration validation failed: {0}")]
    Validation(String),

    /// A value could not be parsed
    #[error("Failed to parse {key}: {reason}")]
    Parse {
        /// Setting that failed to parse
        key: String,
        /// Parser message
        reason: String,
    },
}

impl From<ConfigError> for statepipe_core::PipelineError {
    fn from(error: ConfigError) -> Self {
        Self::InvalidConfig(error.to_string())
    }
}

/// Runtime parameters of one pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// How long a pipeline stays active after its last subscriber leaves
    pub grace_period: Duration,

    /// Maximum number of events processed concurrently
    pub max_concurrency: usize,

    /// Maximum number of undelivered effects buffered while nobody receives
    pub effect_buffer: usize,
}

impl PipelineConfig {
    /// Default grace period
    pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

    /// Default in-flight event limit
    pub const DEFAULT_MAX_CONCURRENCY: usize = 100;

    /// Default effect buffer size
    pub const DEFAULT_EFFECT_BUFFER: usize = 64;

    /// Create a configuration from explicit values.
    #[must_use]
    pub const fn new(grace_period: Duration, max_concurrency: usize, effect_buffer: usize) -> Self {
        Self {
            grace_period,
            max_concurrency,
            effect_buffer,
        }
    }

    /// Set the teardown grace period. Zero tears down as soon as the last
    /// subscriber leaves.
    #[must_use]
    pub const fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Set the in-flight event limit.
    #[must_use]
    pub const fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Set the effect buffer size.
    #[must_use]
    pub const fn with_effect_buffer(mut self, effect_buffer: usize) -> Self {
        self.effect_buffer = effect_buffer;
        self
    }

    /// Check that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the concurrency limit or the
    /// effect buffer is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::Validation(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.effect_buffer == 0 {
            return Err(ConfigError::Validation(
                "effect_buffer must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse a JSON document; missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed JSON and
    /// [`ConfigError::Validation`] on unusable values.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse {
            key: "json".to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read overrides from `STATEPIPE_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if a variable is set but not a number,
    /// and [`ConfigError::Validation`] on unusable values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] with an injectable variable source.
    ///
    /// # Errors
    ///
    /// See [`Self::from_env`].
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_GRACE_PERIOD_MS)? {
            config.grace_period = Duration::from_millis(ms);
        }
        if let Some(limit) = parse_var(&lookup, ENV_MAX_CONCURRENCY)? {
            config.max_concurrency = limit;
        }
        if let Some(size) = parse_var(&lookup, ENV_EFFECT_BUFFER)? {
            config.effect_buffer = size;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T, L>(lookup: &L, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    L: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| ConfigError::Parse {
                key: key.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_GRACE_PERIOD,
            Self::DEFAULT_MAX_CONCURRENCY,
            Self::DEFAULT_EFFECT_BUFFER,
        )
    }
}
