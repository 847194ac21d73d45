//! Desktop simulator for the aerolog air-quality logger.
//!
//! Runs the full aerolog-core supervisor on the host: a synthetic sensor, the
//! persisted log in a local file, the HTTP API on a std TCP socket and a
//! watchdog thread that terminates the process when the loop stalls.
//!
//! # Usage
//!
//! ```text
//! aerolog-simulator [config.json]
//! ```
//!
//! Without a config file the simulator samples every 10 s and serves on port
//! 8080 so it can be watched live.
//!
//! | Variable              | Effect                                      |
//! |-----------------------|---------------------------------------------|
//! | `AEROLOG_LOG_FILE`    | Persisted log path (default `aerolog.log`)  |
//! | `AEROLOG_FAULT_EVERY` | Fail every n-th sensor read                 |
//! | `RUST_LOG`            | `env_logger` filter                         |

mod file_storage;
mod host;
mod tcp;

use std::net::{Ipv4Addr, SocketAddr};
use std::time::{SystemTime, UNIX_EPOCH};
use std::{env, fs};

use aerolog_core::clock::EmbassyClock;
use aerolog_core::config::DeviceConfig;
use aerolog_core::storage::RamStorage;
use aerolog_core::supervisor::{Collaborators, Supervisor};
use log::{error, info, warn};

use crate::file_storage::{FileStorage, HostStorage};
use crate::host::{CountingAlloc, HostIdle, HostProbe, SyntheticSensor, ThreadWatchdog};
use crate::tcp::HostListener;

#[global_allocator]
static GLOBAL: CountingAlloc = CountingAlloc;

// ---------------------------------------------------------------------------
// Simulator constants
// ---------------------------------------------------------------------------

/// Heap the device has after radio and network stacks are up.
const DEVICE_HEAP_BYTES: usize = 192 * 1024;

const DEFAULT_LOG_FILE: &str = "aerolog.log";

const DEMO_PORT: u16 = 8080;
const DEMO_PERIOD_SECS: u32 = 10;
const DEMO_FLUSH_SECS: u32 = 30;

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn load_config() -> Result<DeviceConfig, String> {
    let Some(path) = env::args().nth(1) else {
        let mut config = DeviceConfig::default();
        config.server.port = DEMO_PORT;
        config.sampling.period_secs = DEMO_PERIOD_SECS;
        config.storage.flush_interval_secs = DEMO_FLUSH_SECS;
        return Ok(config);
    };

    let text = fs::read_to_string(&path).map_err(|e| format!("cannot read {path}: {e}"))?;
    DeviceConfig::from_json(&text).map_err(|e| format!("{path}: {e}"))
}

fn open_storage() -> HostStorage {
    let path = env::var("AEROLOG_LOG_FILE").unwrap_or_else(|_| DEFAULT_LOG_FILE.into());
    match FileStorage::open(&path) {
        Ok(storage) => {
            info!("Persisting readings to {}", path);
            HostStorage::File(storage)
        }
        Err(e) => {
            warn!("Cannot open {} ({}), history will not survive a restart", path, e);
            HostStorage::Ram(RamStorage::new())
        }
    }
}

fn wall_clock() -> EmbassyClock {
    let mut clock = EmbassyClock::new();
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(since_epoch) => clock.anchor(since_epoch.as_secs() as u32),
        Err(_) => warn!("System time before the epoch, stamping readings with uptime"),
    }
    clock
}

fn main() {
    env_logger::init();
    info!("Starting aerolog simulator");

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    let fault_every = env::var("AEROLOG_FAULT_EVERY")
        .ok()
        .and_then(|v| v.parse().ok());
    let clock = wall_clock();
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.server.port));

    let parts = Collaborators {
        sensor: SyntheticSensor::new(fault_every),
        storage: open_storage(),
        listener: HostListener::new(addr),
        watchdog: ThreadWatchdog::new(),
        clock,
        probe: HostProbe::new(DEVICE_HEAP_BYTES),
    };

    let mut supervisor = match Supervisor::boot(&config, parts) {
        Ok(supervisor) => supervisor,
        Err(e) => {
            error!("Boot failed: {}", e);
            std::process::exit(2);
        }
    };
    info!(
        "Restored {} readings from the persisted log",
        supervisor.history().buffer().len()
    );

    let mut idle = HostIdle::new(clock);
    embassy_futures::block_on(supervisor.run(&mut idle))
}
