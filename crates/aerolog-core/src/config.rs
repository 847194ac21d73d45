//! Device configuration
//!
//! Every knob of the engine lives here, grouped by the component that reads
//! it. Defaults mirror the shipped device: a reading every 15 minutes, a
//! 12-entry (3 hour) window, an 8 second hardware watchdog.

use embassy_time::Duration;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::storage::MAX_FRAME_READINGS;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    pub sampling: SamplingConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub watchdog: WatchdogConfig,
    pub power: PowerConfig,
    pub health: HealthConfig,
}

/// Acquisition cadence and plausibility limits.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SamplingConfig {
    pub period_secs: u32,
    /// Consecutive faults after which the sensor is reset. 0 disables resets.
    pub max_consecutive_faults: u32,
    /// Worst-case duration of a sensor reset. The reset only starts when at
    /// least this much watchdog time is left.
    pub reset_budget_ms: u32,
    pub co2_range_ppm: (u16, u16),
    pub temperature_range_c: (i16, i16),
    pub humidity_range_pct: (u8, u8),
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            period_secs: 15 * 60,
            max_consecutive_faults: 3,
            reset_budget_ms: 6_000,
            co2_range_ppm: (400, 5000),
            temperature_range_c: (-10, 50),
            humidity_range_pct: (0, 100),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Ring capacity `N`: readings kept in RAM and rebuilt on boot.
    pub history_capacity: usize,
    pub flush_interval_secs: u32,
    /// Unflushed readings kept while storage is failing.
    pub pending_limit: usize,
    /// Retention budget for the persisted log.
    pub max_log_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            history_capacity: 12,
            flush_interval_secs: 15 * 60,
            pending_limit: 48,
            max_log_bytes: 256 * 1024,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub max_connections: usize,
    /// Bytes a single session may move per cycle.
    pub slice_bytes: usize,
    /// Sessions visited per cycle.
    pub session_budget: usize,
    pub session_timeout_ms: u32,
    pub backoff_base_ms: u32,
    pub backoff_max_ms: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 80,
            max_connections: 4,
            slice_bytes: 512,
            session_budget: 4,
            session_timeout_ms: 10_000,
            backoff_base_ms: 5_000,
            backoff_max_ms: 60_000,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct WatchdogConfig {
    pub timeout_ms: u32,
    /// Request service is skipped when less than this remains before the feed deadline.
    pub serve_guard_ms: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 8_000,
            serve_guard_ms: 2_000,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PowerConfig {
    /// Use the low-power idle state instead of a plain wait.
    pub low_power: bool,
    pub wake_margin_ms: u32,
    pub min_sleep_ms: u32,
    pub max_sleep_ms: u32,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            low_power: true,
            wake_margin_ms: 1_000,
            min_sleep_ms: 5,
            max_sleep_ms: 1_000,
        }
    }
}

/// Memory usage thresholds in percent of the heap in use.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    pub warning_pct: u8,
    pub critical_pct: u8,
    pub emergency_pct: u8,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            warning_pct: 75,
            critical_pct: 85,
            emergency_pct: 92,
        }
    }
}

impl DeviceConfig {
    /// Parse a JSON document; missing fields fall back to their defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text).map_err(|_| ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.sampling;
        if s.period_secs == 0 {
            return Err(ConfigError::Invalid("sampling.period_secs must be > 0"));
        }
        if s.co2_range_ppm.0 >= s.co2_range_ppm.1
            || s.temperature_range_c.0 >= s.temperature_range_c.1
            || s.humidity_range_pct.0 >= s.humidity_range_pct.1
            || s.humidity_range_pct.1 > 100
        {
            return Err(ConfigError::Invalid("sampling ranges must be ordered low..high"));
        }

        let st = &self.storage;
        if st.history_capacity == 0 {
            return Err(ConfigError::Invalid("storage.history_capacity must be > 0"));
        }
        if st.flush_interval_secs == 0 {
            return Err(ConfigError::Invalid("storage.flush_interval_secs must be > 0"));
        }
        if st.pending_limit == 0 || st.pending_limit > MAX_FRAME_READINGS {
            return Err(ConfigError::Invalid("storage.pending_limit must be within 1..=64"));
        }
        if st.max_log_bytes < 4096 {
            return Err(ConfigError::Invalid("storage.max_log_bytes must be >= 4096"));
        }

        let sv = &self.server;
        if sv.max_connections == 0 || sv.session_budget == 0 {
            return Err(ConfigError::Invalid("server connection limits must be > 0"));
        }
        if sv.slice_bytes < 64 {
            return Err(ConfigError::Invalid("server.slice_bytes must be >= 64"));
        }
        if sv.backoff_base_ms == 0 || sv.backoff_base_ms > sv.backoff_max_ms {
            return Err(ConfigError::Invalid("server backoff must satisfy 0 < base <= max"));
        }

        let w = &self.watchdog;
        if w.timeout_ms == 0
            || w.serve_guard_ms >= w.timeout_ms
            || self.power.wake_margin_ms >= w.timeout_ms
        {
            return Err(ConfigError::Invalid(
                "watchdog.timeout_ms must exceed serve_guard_ms and power.wake_margin_ms",
            ));
        }

        if s.reset_budget_ms >= w.timeout_ms {
            return Err(ConfigError::Invalid("sampling.reset_budget_ms must be below watchdog.timeout_ms"));
        }

        if self.power.min_sleep_ms > self.power.max_sleep_ms {
            return Err(ConfigError::Invalid("power.min_sleep_ms must be <= max_sleep_ms"));
        }

        let h = &self.health;
        if !(h.warning_pct < h.critical_pct && h.critical_pct < h.emergency_pct && h.emergency_pct <= 100) {
            return Err(ConfigError::Invalid("health thresholds must be increasing and <= 100"));
        }

        Ok(())
    }
}

impl SamplingConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs as u64)
    }

    pub fn reset_budget(&self) -> Duration {
        Duration::from_millis(self.reset_budget_ms as u64)
    }
}

impl StorageConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs as u64)
    }
}

impl ServerConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms as u64)
    }
}

impl WatchdogConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms as u64)
    }

    pub fn serve_guard(&self) -> Duration {
        Duration::from_millis(self.serve_guard_ms as u64)
    }
}
