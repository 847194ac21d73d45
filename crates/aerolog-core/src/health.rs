//! Device health reporting
//!
//! [`HealthMonitor`] accumulates the few facts that are not derivable from
//! other components (acquisition outcomes, link state). A [`HealthSnapshot`] is
//! assembled on demand from the monitor, the history store and a
//! [`SystemProbe`]; nothing here is persisted.

use alloc::string::String;
use core::fmt::Write;

use embassy_time::Instant;
use log::warn;
use serde::Serialize;

use crate::config::HealthConfig;
use crate::error::{SensorFault, StorageFault};
use crate::storage::{HistoryStore, Storage};

/// Platform memory statistics.
pub trait SystemProbe {
    fn free_memory(&self) -> usize;
    fn total_memory(&self) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Down,
    Connecting,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryLevel {
    Normal,
    Warning,
    Critical,
    Emergency,
}

impl MemoryLevel {
    pub fn classify(used_pct: u8, config: &HealthConfig) -> Self {
        if used_pct >= config.emergency_pct {
            Self::Emergency
        } else if used_pct >= config.critical_pct {
            Self::Critical
        } else if used_pct >= config.warning_pct {
            Self::Warning
        } else {
            Self::Normal
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub free_memory: usize,
    pub total_memory: usize,
    pub memory_used_pct: u8,
    pub memory_level: MemoryLevel,
    pub uptime_secs: u64,
    pub uptime_text: String,
    pub connection_state: ConnectionState,
    pub last_acquisition_fault: Option<&'static str>,
    pub measurements_total: u32,
    pub measurements_failed: u32,
    pub consecutive_faults: u32,
    pub memory_emergencies: u32,
    pub log_bytes: u64,
    pub pending_records: usize,
    pub window_len: usize,
    pub flushed_records: u32,
    pub failed_flushes: u32,
    pub last_storage_fault: Option<&'static str>,
}

pub struct HealthMonitor {
    config: HealthConfig,
    boot: Instant,
    connection: ConnectionState,
    measurements_total: u32,
    measurements_failed: u32,
    consecutive_faults: u32,
    last_acquisition_fault: Option<SensorFault>,
    last_storage_fault: Option<StorageFault>,
    last_level: MemoryLevel,
    memory_emergencies: u32,
}

impl HealthMonitor {
    pub fn new(config: &HealthConfig, boot: Instant) -> Self {
        Self {
            config: config.clone(),
            boot,
            connection: ConnectionState::Down,
            measurements_total: 0,
            measurements_failed: 0,
            consecutive_faults: 0,
            last_acquisition_fault: None,
            last_storage_fault: None,
            last_level: MemoryLevel::Normal,
            memory_emergencies: 0,
        }
    }

    pub fn record_acquisition(&mut self, outcome: Result<(), SensorFault>) {
        self.measurements_total = self.measurements_total.wrapping_add(1);
        match outcome {
            Ok(()) => self.consecutive_faults = 0,
            Err(fault) => {
                self.measurements_failed = self.measurements_failed.wrapping_add(1);
                self.consecutive_faults += 1;
                self.last_acquisition_fault = Some(fault);
            }
        }
    }

    pub fn record_storage(&mut self, outcome: Result<(), StorageFault>) {
        if let Err(fault) = outcome {
            self.last_storage_fault = Some(fault);
        }
    }

    pub fn set_connection(&mut self, state: ConnectionState) {
        self.connection = state;
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn consecutive_faults(&self) -> u32 {
        self.consecutive_faults
    }

    /// Sample memory and log a warning when the usage level rises.
    pub fn check_memory<P: SystemProbe>(&mut self, probe: &P) -> MemoryLevel {
        let level = MemoryLevel::classify(used_pct(probe), &self.config);
        if level > self.last_level {
            warn!("Memory usage {}%, level {:?}", used_pct(probe), level);
        }
        self.last_level = level;
        level
    }

    /// Count an emergency recovery; returns the running total.
    pub fn record_emergency(&mut self) -> u32 {
        self.memory_emergencies = self.memory_emergencies.wrapping_add(1);
        self.memory_emergencies
    }

    pub fn memory_emergencies(&self) -> u32 {
        self.memory_emergencies
    }

    pub fn snapshot<P: SystemProbe, S: Storage>(
        &self,
        now: Instant,
        probe: &P,
        store: &HistoryStore<S>,
    ) -> HealthSnapshot {
        let used = used_pct(probe);
        let uptime_secs = now.saturating_duration_since(self.boot).as_secs();
        let store_stats = store.stats();
        HealthSnapshot {
            free_memory: probe.free_memory(),
            total_memory: probe.total_memory(),
            memory_used_pct: used,
            memory_level: MemoryLevel::classify(used, &self.config),
            uptime_secs,
            uptime_text: format_uptime(uptime_secs),
            connection_state: self.connection,
            last_acquisition_fault: self.last_acquisition_fault.map(SensorFault::code),
            measurements_total: self.measurements_total,
            measurements_failed: self.measurements_failed,
            consecutive_faults: self.consecutive_faults,
            memory_emergencies: self.memory_emergencies,
            log_bytes: store.log_len(),
            pending_records: store.pending_len(),
            window_len: store.buffer().len(),
            flushed_records: store_stats.flushed_records,
            failed_flushes: store_stats.failed_flushes,
            last_storage_fault: self
                .last_storage_fault
                .or(store_stats.last_fault)
                .map(StorageFault::code),
        }
    }
}

fn used_pct<P: SystemProbe>(probe: &P) -> u8 {
    let total = probe.total_memory();
    if total == 0 {
        return 0;
    }
    let used = total.saturating_sub(probe.free_memory());
    ((used as u64 * 100) / total as u64) as u8
}

/// `"2d 3h 4m"`, `"3h 4m"` or `"4m 5s"`.
pub fn format_uptime(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    let seconds = secs % 60;

    let mut text = String::new();
    // Writing to a String cannot fail.
    let _ = if days > 0 {
        write!(text, "{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        write!(text, "{hours}h {minutes}m")
    } else {
        write!(text, "{minutes}m {seconds}s")
    };
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::storage::RamStorage;
    use crate::testing::FixedProbe;
    use embassy_time::Duration;

    #[test]
    fn test_uptime_format() {
        assert_eq!(format_uptime(65), "1m 5s");
        assert_eq!(format_uptime(3 * 3600 + 4 * 60 + 59), "3h 4m");
        assert_eq!(format_uptime(2 * 86_400 + 3 * 3600 + 4 * 60), "2d 3h 4m");
        assert_eq!(format_uptime(0), "0m 0s");
    }

    #[test]
    fn test_memory_levels() {
        let config = HealthConfig::default();
        assert_eq!(MemoryLevel::classify(50, &config), MemoryLevel::Normal);
        assert_eq!(MemoryLevel::classify(75, &config), MemoryLevel::Warning);
        assert_eq!(MemoryLevel::classify(85, &config), MemoryLevel::Critical);
        assert_eq!(MemoryLevel::classify(99, &config), MemoryLevel::Emergency);
    }

    #[test]
    fn test_acquisition_counters() {
        let mut monitor = HealthMonitor::new(&HealthConfig::default(), Instant::from_secs(0));
        monitor.record_acquisition(Ok(()));
        monitor.record_acquisition(Err(SensorFault::Bus));
        monitor.record_acquisition(Err(SensorFault::Timeout));
        assert_eq!(monitor.consecutive_faults(), 2);
        monitor.record_acquisition(Ok(()));
        assert_eq!(monitor.consecutive_faults(), 0, "success clears the streak");

        let store = HistoryStore::new(RamStorage::new(), &StorageConfig::default(), Instant::from_secs(0));
        let probe = FixedProbe::new(40_000, 100_000);
        let snapshot = monitor.snapshot(Instant::from_secs(0) + Duration::from_secs(3_700), &probe, &store);
        assert_eq!(snapshot.measurements_total, 4);
        assert_eq!(snapshot.measurements_failed, 2);
        assert_eq!(snapshot.last_acquisition_fault, Some("timeout"));
        assert_eq!(snapshot.memory_used_pct, 60);
        assert_eq!(snapshot.memory_level, MemoryLevel::Normal);
        assert_eq!(snapshot.uptime_text, "1h 1m");
        assert_eq!(snapshot.connection_state, ConnectionState::Down);
    }

    #[test]
    fn test_snapshot_serializes() {
        let monitor = HealthMonitor::new(&HealthConfig::default(), Instant::from_secs(0));
        let store = HistoryStore::new(RamStorage::new(), &StorageConfig::default(), Instant::from_secs(0));
        let snapshot = monitor.snapshot(Instant::from_secs(10), &FixedProbe::new(10, 100), &store);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains(r#""memory_level":"emergency""#), "{json}");
        assert!(json.contains(r#""connection_state":"down""#), "{json}");
    }
}
