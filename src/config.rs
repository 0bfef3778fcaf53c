//! Engine configuration.
//!
//! Loadable from TOML; every field has a default so a partial file (or an
//! empty one) is valid.

use crate::scheduler::SchedulerMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for creating a [`MainLoop`](crate::engine::MainLoop).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Realtime (monotonic clock, sleeping) or offline (virtual time).
    pub mode: SchedulerMode,

    /// Upper bound on deferred callbacks per drain, and on wake-ups
    /// dispatched at one instant (offline) or back to back without
    /// sleeping (realtime).
    pub max_dispatches: usize,

    /// How long `run_until` sleeps when nothing is scheduled.
    #[serde(with = "humantime_serde")]
    pub idle_sleep: Duration,

    /// Update interval for simulated stimuli.
    #[serde(with = "humantime_serde")]
    pub frame_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: SchedulerMode::Realtime,
            max_dispatches: 200_000,
            idle_sleep: Duration::from_millis(1),
            frame_interval: Duration::from_micros(16_667),
        }
    }
}

impl EngineConfig {
    /// Default configuration for virtual-time runs.
    pub fn offline() -> Self {
        Self {
            mode: SchedulerMode::Offline,
            ..Default::default()
        }
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or the values are invalid.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check the values for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_dispatches == 0 {
            return Err(ConfigError::Invalid(
                "max_dispatches must be greater than 0".to_string(),
            ));
        }
        if self.frame_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "frame_interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A field holds a value the engine can't work with.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
