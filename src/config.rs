//! Cache configuration: typed settings with layered precedence (file → env).

use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;

const DEFAULT_CONFIG_BASENAME: &str = "onside";
const ENV_PREFIX: &str = "ONSIDE";

const DEFAULT_STALE_TIME_MS: u64 = 0;
const DEFAULT_SLOT_RETENTION_MS: u64 = 5 * 60 * 1000;
const DEFAULT_SWEEP_INTERVAL_MS: u64 = 60 * 1000;
const DEFAULT_DEBOUNCE_WINDOW_MS: u64 = 250;
const DEFAULT_LOG_LEVEL: &str = "info";

/// Cache behavior settings.
///
/// A `stale_time_ms` of zero means ready slots never go stale by age alone;
/// they are only re-fetched when invalidated or explicitly refetched.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Age after which a ready slot stops counting as fresh (0 = never).
    pub stale_time_ms: u64,
    /// How long an unsubscribed slot is retained before garbage collection.
    pub slot_retention_ms: u64,
    /// Interval of the background sweep loop.
    pub sweep_interval_ms: u64,
    /// Quiescence window for debounced queries (search-as-you-type).
    pub debounce_window_ms: u64,
    /// Re-issue stale queries immediately when they still have subscribers.
    pub eager_refetch: bool,
    /// Logging settings consumed by `telemetry::init`.
    pub logging: LoggingSettings,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            stale_time_ms: DEFAULT_STALE_TIME_MS,
            slot_retention_ms: DEFAULT_SLOT_RETENTION_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            debounce_window_ms: DEFAULT_DEBOUNCE_WINDOW_MS,
            eager_refetch: true,
            logging: LoggingSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Base log level directive (trace|debug|info|warn|error).
    pub level: String,
    /// Emit JSON logs instead of the compact human format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
}

impl CacheSettings {
    /// Load settings from `onside.toml` (if present) and `ONSIDE__*`
    /// environment variables, falling back to defaults per field.
    pub fn load() -> Result<Self, LoadError> {
        let raw = Config::builder()
            .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        Ok(raw.try_deserialize()?)
    }

    /// Freshness window, or `None` when age never stales a slot.
    pub fn stale_time(&self) -> Option<Duration> {
        (self.stale_time_ms > 0).then(|| Duration::from_millis(self.stale_time_ms))
    }

    pub const fn slot_retention(&self) -> Duration {
        Duration::from_millis(self.slot_retention_ms)
    }

    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub const fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }
}
