//! Kiosk configuration.
//!
//! Configuration is layered: built-in defaults (see [`constants`](crate::constants)),
//! then an optional TOML file, then `ROLLCALL_*` environment variables.
//! Durations are expressed in milliseconds in every layer.
//!
//! ```toml
//! [device]
//! device_id = "4"
//! control_filter = "+"
//!
//! [capture]
//! classify_interval_ms = 2000
//! cooldown_ms = 5000
//! acceptance_threshold = 70.0
//!
//! [gateway]
//! response_timeout_ms = 10000
//! ```

use crate::{Result, constants::*, error::Error, types::DeviceId};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level kiosk configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KioskConfig {
    pub device: DeviceConfig,
    pub capture: CaptureConfig,
    pub card_reader: CardReaderConfig,
    pub gateway: GatewayConfig,
}

/// Identity of this kiosk on the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub device_id: DeviceId,

    /// Device segment of the control subscription (`+` listens to all).
    pub control_filter: String,
}

/// Capture pipeline tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub classify_interval_ms: u64,
    pub cooldown_ms: u64,
    pub acceptance_threshold: f32,
    pub acquire_timeout_ms: u64,
    pub max_consecutive_errors: u32,
    pub settle_delay_ms: u64,
    pub open_attempts: u32,
    pub open_retry_delay_ms: u64,
    pub join_timeout_ms: u64,
}

/// Card reader loop tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardReaderConfig {
    pub poll_timeout_ms: u64,
    pub max_consecutive_errors: u32,
    pub join_timeout_ms: u64,
}

/// Submission gateway tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub response_timeout_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: DeviceId::default(),
            control_filter: DEFAULT_CONTROL_FILTER.to_string(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            classify_interval_ms: DEFAULT_CLASSIFY_INTERVAL_MS,
            cooldown_ms: DEFAULT_SUBMISSION_COOLDOWN_MS,
            acceptance_threshold: DEFAULT_ACCEPTANCE_THRESHOLD,
            acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
            max_consecutive_errors: DEFAULT_MAX_CAPTURE_ERRORS,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            open_attempts: DEFAULT_OPEN_ATTEMPTS,
            open_retry_delay_ms: DEFAULT_OPEN_RETRY_DELAY_MS,
            join_timeout_ms: DEFAULT_JOIN_TIMEOUT_MS,
        }
    }
}

impl Default for CardReaderConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: DEFAULT_CARD_POLL_TIMEOUT_MS,
            max_consecutive_errors: DEFAULT_MAX_READER_ERRORS,
            join_timeout_ms: DEFAULT_JOIN_TIMEOUT_MS,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
        }
    }
}

impl CaptureConfig {
    pub fn classify_interval(&self) -> Duration {
        Duration::from_millis(self.classify_interval_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn open_retry_delay(&self) -> Duration {
        Duration::from_millis(self.open_retry_delay_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

impl CardReaderConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

impl GatewayConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

impl KioskConfig {
    /// Parse a TOML document. Missing keys keep their defaults.
    ///
    /// # Errors
    /// Returns `Error::Config` if the document is not valid TOML or has
    /// values of the wrong type, and `Error::InvalidConfig` if a value is
    /// out of range.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: KioskConfig =
            toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file, then apply environment
    /// overrides.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or an
    /// override has an invalid value.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                tracing::debug!(path = %path.display(), "Loaded configuration file");
                Self::from_toml_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (keys without the `ROLLCALL_` prefix).
    ///
    /// # Errors
    /// Returns `Error::InvalidConfig` when an override cannot be parsed.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DEVICE_ID") {
            self.device.device_id = DeviceId::new(&v).map_err(|e| Error::InvalidConfig {
                key: "DEVICE_ID".to_string(),
                message: e.to_string(),
            })?;
        }
        if let Some(v) = lookup("CONTROL_FILTER") {
            self.device.control_filter = v;
        }
        if let Some(v) = lookup("RESPONSE_TIMEOUT_MS") {
            self.gateway.response_timeout_ms = parse_override("RESPONSE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("CLASSIFY_INTERVAL_MS") {
            self.capture.classify_interval_ms = parse_override("CLASSIFY_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("COOLDOWN_MS") {
            self.capture.cooldown_ms = parse_override("COOLDOWN_MS", &v)?;
        }
        if let Some(v) = lookup("ACCEPTANCE_THRESHOLD") {
            self.capture.acceptance_threshold = parse_override("ACCEPTANCE_THRESHOLD", &v)?;
        }
        Ok(())
    }

    /// Check ranges that serde cannot express.
    ///
    /// # Errors
    /// Returns `Error::InvalidConfig` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        let filter = &self.device.control_filter;
        if filter.is_empty() || filter.contains('/') || filter.contains('#') {
            return invalid("device.control_filter", "must be a single topic level");
        }
        if self.capture.max_consecutive_errors == 0 {
            return invalid("capture.max_consecutive_errors", "must be at least 1");
        }
        if self.capture.open_attempts == 0 {
            return invalid("capture.open_attempts", "must be at least 1");
        }
        if !(self.capture.acceptance_threshold.is_finite() && self.capture.acceptance_threshold > 0.0)
        {
            return invalid("capture.acceptance_threshold", "must be a positive number");
        }
        if self.capture.acquire_timeout_ms == 0 {
            return invalid("capture.acquire_timeout_ms", "must be positive");
        }
        if self.card_reader.poll_timeout_ms == 0 {
            return invalid("card_reader.poll_timeout_ms", "must be positive");
        }
        if self.card_reader.max_consecutive_errors == 0 {
            return invalid("card_reader.max_consecutive_errors", "must be at least 1");
        }
        if self.gateway.response_timeout_ms == 0 {
            return invalid("gateway.response_timeout_ms", "must be positive");
        }
        Ok(())
    }

    /// Render the configuration as TOML.
    ///
    /// # Errors
    /// Returns `Error::Encode` if serialization fails.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Encode(e.to_string()))
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| Error::InvalidConfig {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn invalid(key: &str, message: &str) -> Result<()> {
    Err(Error::InvalidConfig {
        key: key.to_string(),
        message: message.to_string(),
    })
}
