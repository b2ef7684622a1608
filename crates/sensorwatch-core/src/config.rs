//! Monitor configuration.
//!
//! Loaded from a TOML file; every field has a default so an empty file (or no
//! file) is a valid configuration. Durations are written as strings such as
//! `"500ms"`, `"3s"`, `"1m"` or `"2h"`; a bare number means seconds.
//!
//! ```toml
//! [buffer]
//! capacity = 1000
//!
//! [alert]
//! vibration_threshold = 1.0
//! latest_limit = 100
//!
//! [server]
//! host = "127.0.0.1"
//! port = 8050
//!
//! [push]
//! reconnect_initial = "1s"
//! reconnect_max = "30s"
//!
//! [pull]
//! interval = "3s"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::alert::DEFAULT_VIBRATION_THRESHOLD;
use crate::buffer::DEFAULT_CAPACITY;
use crate::error::{Error, Result};
use crate::query::DEFAULT_LATEST_LIMIT;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    pub buffer: BufferConfig,
    pub alert: AlertConfig,
    pub server: ServerConfig,
    pub push: PushConfig,
    pub pull: PullConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BufferConfig {
    /// Maximum records retained across all machines.
    pub capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlertConfig {
    /// Vibration above this (mm/s) raises an alert.
    pub vibration_threshold: f64,
    /// Rows shown by latest-reading views.
    pub latest_limit: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            vibration_threshold: DEFAULT_VIBRATION_THRESHOLD,
            latest_limit: DEFAULT_LATEST_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8050,
        }
    }
}

/// Reconnect backoff for push feeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PushConfig {
    #[serde(with = "duration_str")]
    pub reconnect_initial: Duration,
    #[serde(with = "duration_str")]
    pub reconnect_max: Duration,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            reconnect_initial: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PullConfig {
    /// Time between dataset fetches.
    #[serde(with = "duration_str")]
    pub interval: Duration,
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
        }
    }
}

impl MonitorConfig {
    /// Read and validate a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        log::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Reject values no component can run with.
    pub fn validate(&self) -> Result<()> {
        if self.buffer.capacity == 0 {
            return Err(Error::Config("buffer.capacity must be at least 1".into()));
        }
        if !self.alert.vibration_threshold.is_finite() {
            return Err(Error::Config(
                "alert.vibration_threshold must be a finite number".into(),
            ));
        }
        if self.alert.latest_limit == 0 {
            return Err(Error::Config("alert.latest_limit must be at least 1".into()));
        }
        if self.push.reconnect_initial.is_zero() {
            return Err(Error::Config("push.reconnect_initial must be non-zero".into()));
        }
        if self.push.reconnect_max < self.push.reconnect_initial {
            return Err(Error::Config(
                "push.reconnect_max must not be shorter than push.reconnect_initial".into(),
            ));
        }
        if self.pull.interval.is_zero() {
            return Err(Error::Config("pull.interval must be non-zero".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Durations
// ---------------------------------------------------------------------------

/// Parse a duration string like `"500ms"`, `"3s"`, `"5m"`, `"1h"` or `"10"`
/// (seconds).
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();

    let (numeric, multiplier) = if let Some(rest) = s.strip_suffix("ms") {
        (rest, 1.0)
    } else if let Some(rest) = s.strip_suffix('s') {
        (rest, 1_000.0)
    } else if let Some(rest) = s.strip_suffix('m') {
        (rest, 60_000.0)
    } else if let Some(rest) = s.strip_suffix('h') {
        (rest, 3_600_000.0)
    } else {
        (s, 1_000.0)
    };

    let value: f64 = numeric
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid duration '{s}'")))?;
    if !value.is_finite() || value < 0.0 {
        return Err(Error::Config(format!("invalid duration '{s}'")));
    }

    Ok(Duration::from_millis((value * multiplier).round() as u64))
}

/// Inverse of [`parse_duration`], using the largest whole unit.
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms > 0 && ms % 3_600_000 == 0 {
        format!("{}h", ms / 3_600_000)
    } else if ms > 0 && ms % 60_000 == 0 {
        format!("{}m", ms / 60_000)
    } else if ms % 1_000 == 0 {
        format!("{}s", ms / 1_000)
    } else {
        format!("{ms}ms")
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
