//! Detector configuration
//!
//! Values come from the [`Lockwatch`](crate::Lockwatch) builder, a serde
//! source (JSON, for instance), or the `LOCKWATCH_*` environment variables.

use crate::core::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable overriding the monitor interval, in milliseconds
pub const ENV_INTERVAL_MS: &str = "LOCKWATCH_INTERVAL_MS";
/// Environment variable toggling stack capture (`1`/`0`, `true`/`false`)
pub const ENV_CAPTURE_STACKS: &str = "LOCKWATCH_CAPTURE_STACKS";
/// Environment variable limiting captured frames per stack
pub const ENV_MAX_FRAMES: &str = "LOCKWATCH_MAX_FRAMES";

/// Configuration for the deadlock detector and its monitor loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// How long the monitor sleeps between detection passes
    #[serde(rename = "check_interval_ms", with = "millis")]
    pub check_interval: Duration,
    /// Capture a call stack on every blocking acquire
    pub capture_stacks: bool,
    /// Upper bound on frames kept per captured stack
    pub max_frames: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            check_interval: Duration::from_secs(10),
            capture_stacks: true,
            max_frames: 64,
        }
    }
}

impl DetectorConfig {
    /// Defaults overridden by any `LOCKWATCH_*` variables that are set
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = DetectorConfig::default();

        if let Some(value) = lookup(ENV_INTERVAL_MS) {
            let ms: u64 = value.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidEnv {
                    key: ENV_INTERVAL_MS,
                    value: value.clone(),
                    reason: e.to_string(),
                }
            })?;
            config.check_interval = Duration::from_millis(ms);
        }

        if let Some(value) = lookup(ENV_CAPTURE_STACKS) {
            config.capture_stacks = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        key: ENV_CAPTURE_STACKS,
                        value,
                        reason: "expected a boolean".to_string(),
                    });
                }
            };
        }

        if let Some(value) = lookup(ENV_MAX_FRAMES) {
            config.max_frames = value.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidEnv {
                    key: ENV_MAX_FRAMES,
                    value: value.clone(),
                    reason: e.to_string(),
                }
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the monitor cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.check_interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        if self.max_frames == 0 {
            return Err(ConfigError::ZeroMaxFrames);
        }
        Ok(())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
