//! Host stand-ins for the device peripherals

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;

use aerolog_core::clock::Clock;
use aerolog_core::error::SensorFault;
use aerolog_core::health::SystemProbe;
use aerolog_core::power::{IdleSleep, WakeReason};
use aerolog_core::sensors::{SensorPort, SensorSample};
use aerolog_core::storage::Centi;
use aerolog_core::watchdog::HardwareWatchdog;
use embassy_time::{Duration, Instant};
use log::{error, info, warn};

// ---------------------------------------------------------------------------
// Synthetic sensor
// ---------------------------------------------------------------------------

/// Produces readings that drift sinusoidally over time.
pub struct SyntheticSensor {
    started: Instant,
    reads: u32,
    /// Every n-th read fails with a bus fault, when set.
    fault_every: Option<u32>,
}

impl SyntheticSensor {
    pub fn new(fault_every: Option<u32>) -> Self {
        Self {
            started: Instant::now(),
            reads: 0,
            fault_every: fault_every.filter(|&n| n > 0),
        }
    }

    fn sample_at(t: f64) -> SensorSample {
        // Temperature: 20–26 °C with slow drift
        let temperature = 23.0 + 3.0 * (t / 120.0).sin() + 0.5 * (t / 37.0).cos();
        // Humidity: 40–60 % with a different period
        let humidity = 50.0 + 10.0 * (t / 180.0).sin() + 2.0 * (t / 23.0).cos();
        // CO₂: 400–800 ppm with a longer cycle
        let co2 = 600.0 + 200.0 * (t / 300.0).sin() + 30.0 * (t / 41.0).cos();

        SensorSample::new(
            co2 as u16,
            Centi((temperature * 100.0) as i32),
            Centi((humidity * 100.0) as i32),
        )
    }
}

impl SensorPort for SyntheticSensor {
    async fn read(&mut self) -> Result<SensorSample, SensorFault> {
        self.reads += 1;
        if let Some(n) = self.fault_every
            && self.reads % n == 0
        {
            return Err(SensorFault::Bus);
        }
        let t = Instant::now().duration_since(self.started).as_millis() as f64 / 1000.0;
        Ok(Self::sample_at(t))
    }

    async fn reset(&mut self) -> Result<(), SensorFault> {
        info!("Synthetic sensor reset after {} reads", self.reads);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Memory probe
// ---------------------------------------------------------------------------

static ALLOCATED: AtomicUsize = AtomicUsize::new(0);

/// System allocator that keeps a running total of live heap bytes.
pub struct CountingAlloc;

unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            ALLOCATED.fetch_add(layout.size(), Ordering::Relaxed);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) };
        ALLOCATED.fetch_sub(layout.size(), Ordering::Relaxed);
    }
}

/// Reports live heap use against the heap size the device would have.
pub struct HostProbe {
    heap_size: usize,
}

impl HostProbe {
    pub fn new(heap_size: usize) -> Self {
        Self { heap_size }
    }
}

impl SystemProbe for HostProbe {
    fn free_memory(&self) -> usize {
        self.heap_size
            .saturating_sub(ALLOCATED.load(Ordering::Relaxed))
    }

    fn total_memory(&self) -> usize {
        self.heap_size
    }
}

// ---------------------------------------------------------------------------
// Watchdog
// ---------------------------------------------------------------------------

/// Background thread that kills the process when the loop stops feeding it,
/// the way the RTC watchdog resets the chip.
pub struct ThreadWatchdog {
    last_feed_ms: Arc<AtomicU64>,
    started: Arc<AtomicBool>,
}

/// Exit status of a watchdog reset.
pub const WATCHDOG_EXIT: i32 = 3;

impl ThreadWatchdog {
    pub fn new() -> Self {
        Self {
            last_feed_ms: Arc::new(AtomicU64::new(Instant::now().as_millis())),
            started: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl HardwareWatchdog for ThreadWatchdog {
    fn enable(&mut self, timeout: Duration) {
        self.feed();
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }

        let last_feed_ms = Arc::clone(&self.last_feed_ms);
        let timeout_ms = timeout.as_millis();
        let spawned = thread::Builder::new()
            .name("watchdog".into())
            .spawn(move || {
                loop {
                    thread::sleep(std::time::Duration::from_millis(timeout_ms / 4 + 1));
                    let starved = Instant::now()
                        .as_millis()
                        .saturating_sub(last_feed_ms.load(Ordering::Acquire));
                    if starved > timeout_ms {
                        error!("Watchdog not fed for {} ms, resetting", starved);
                        std::process::exit(WATCHDOG_EXIT);
                    }
                }
            });
        if let Err(err) = spawned {
            warn!("Watchdog thread unavailable: {}", err);
        }
    }

    fn feed(&mut self) {
        self.last_feed_ms
            .store(Instant::now().as_millis(), Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Idle
// ---------------------------------------------------------------------------

/// Sleeps the thread until the wake deadline.
pub struct HostIdle<C> {
    clock: C,
}

/// Floor on a busy rest so an open session does not spin a core.
const BUSY_NAP: std::time::Duration = std::time::Duration::from_millis(1);

impl<C: Clock> HostIdle<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdleSleep for HostIdle<C> {
    async fn idle_until(&mut self, until: Instant, _low_power: bool) -> WakeReason {
        let now = self.clock.now();
        let wait = until
            .checked_duration_since(now)
            .map(|d| std::time::Duration::from_micros(d.as_micros()))
            .unwrap_or_default();
        thread::sleep(wait.max(BUSY_NAP));
        WakeReason::Timer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_sample_stays_in_band() {
        for t in (0..3600).step_by(7) {
            let sample = SyntheticSensor::sample_at(t as f64);
            assert!((370..=830).contains(&sample.co2_ppm), "co2 {} at t={}", sample.co2_ppm, t);
            assert!((1950..=2650).contains(&sample.temperature.0), "temperature at t={}", t);
            assert!((3800..=6200).contains(&sample.humidity.0), "humidity at t={}", t);
        }
    }

    #[test]
    fn test_synthetic_sensor_injects_faults() {
        let mut sensor = SyntheticSensor::new(Some(3));
        let outcomes: Vec<_> = (0..6)
            .map(|_| embassy_futures::block_on(sensor.read()).is_ok())
            .collect();
        assert_eq!(outcomes, [true, true, false, true, true, false], "every third read fails");
    }
}
