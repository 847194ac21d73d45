//! Watchdog, heap probe and idle primitive

use core::cell::RefCell;

use aerolog_core::health::SystemProbe;
use aerolog_core::power::{IdleSleep, WakeReason};
use aerolog_core::watchdog::HardwareWatchdog;
use embassy_time::{Duration, Instant, Timer};
use esp_hal::rtc_cntl::{Rtc, RwdtStage, RwdtStageAction};
use log::info;

use crate::net::SocketPool;

/// RTC watchdog: resets the whole system, Wi-Fi included, when not fed.
pub struct RtcWatchdog {
    rtc: Rtc<'static>,
}

impl RtcWatchdog {
    pub fn new(rtc: Rtc<'static>) -> Self {
        Self { rtc }
    }
}

impl HardwareWatchdog for RtcWatchdog {
    fn enable(&mut self, timeout: Duration) {
        let rwdt = &mut self.rtc.rwdt;
        rwdt.set_timeout(
            RwdtStage::Stage0,
            esp_hal::time::Duration::from_millis(timeout.as_millis()),
        );
        rwdt.set_stage_action(RwdtStage::Stage0, RwdtStageAction::ResetSystem);
        rwdt.enable();
        rwdt.feed();
        info!("RTC watchdog armed ({} ms)", timeout.as_millis());
    }

    fn feed(&mut self) {
        self.rtc.rwdt.feed();
    }
}

/// Heap statistics from esp-alloc.
pub struct HeapProbe;

impl SystemProbe for HeapProbe {
    fn free_memory(&self) -> usize {
        esp_alloc::HEAP.free()
    }

    fn total_memory(&self) -> usize {
        esp_alloc::HEAP.free() + esp_alloc::HEAP.used()
    }
}

/// How often an idle period checks the socket pool for new clients.
const CONNECTION_POLL: Duration = Duration::from_millis(50);

/// Timer wait that ends early when a client connects.
///
/// While every task waits the executor parks the core, so the plain and
/// low-power waits are the same timer here.
pub struct NetIdle {
    pool: &'static RefCell<SocketPool>,
}

impl NetIdle {
    pub fn new(pool: &'static RefCell<SocketPool>) -> Self {
        Self { pool }
    }
}

impl IdleSleep for NetIdle {
    async fn idle_until(&mut self, until: Instant, _low_power: bool) -> WakeReason {
        // Busy cycles still yield so the network runner and Wi-Fi task progress.
        embassy_futures::yield_now().await;
        loop {
            let now = Instant::now();
            if now >= until {
                return WakeReason::Timer;
            }
            if self.pool.borrow().connection_waiting() {
                return WakeReason::Connection;
            }
            Timer::at(until.min(now + CONNECTION_POLL)).await;
        }
    }
}
