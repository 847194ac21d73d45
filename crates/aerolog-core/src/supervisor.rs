//! Composition root and scheduling loop
//!
//! The [`Supervisor`] owns every component and drives one cycle at a time in a
//! fixed order:
//!
//! ```text
//! (ResetSensor | Acquire -> Buffer) -> (Flush) -> (Serve) -> FeedWatchdog -> decide sleep
//! ```
//!
//! Acquisition only runs once its deadline has come, flushing only when the
//! flush interval has elapsed, and request service is skipped when the
//! watchdog deadline is too close. A sensor reset gets a cycle of its own and
//! waits for one that starts with enough watchdog time left. The feed happens
//! exactly once per cycle whatever the earlier phases reported.

use embassy_time::{Duration, Instant};
use heapless::Vec;
use log::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::DeviceConfig;
use crate::error::{ConfigError, SensorFault, StorageFault};
use crate::health::{HealthMonitor, HealthSnapshot, MemoryLevel, SystemProbe};
use crate::power::{Deadlines, IdleSleep, PowerScheduler, SleepDecision, WakeReason};
use crate::sensors::{SampleLimits, SensorPort};
use crate::server::{Listener, RequestServer, ServeContext, ServeReport};
use crate::storage::{HistoryStore, Reading, Storage};
use crate::watchdog::{HardwareWatchdog, WatchdogGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    ResetSensor,
    Acquire,
    Buffer,
    Flush,
    Serve,
    FeedWatchdog,
}

/// What one cycle did, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub phases: Vec<CyclePhase, 5>,
    pub reading: Option<Reading>,
    pub flush: Option<Result<usize, StorageFault>>,
    pub serve: Option<ServeReport>,
    pub sleep: SleepDecision,
}

impl CycleReport {
    fn new() -> Self {
        Self {
            phases: Vec::new(),
            reading: None,
            flush: None,
            serve: None,
            sleep: SleepDecision::Busy,
        }
    }

    fn enter(&mut self, phase: CyclePhase) {
        // Each phase runs at most once and a reset replaces Acquire and
        // Buffer, so the list never overflows.
        let _ = self.phases.push(phase);
    }

    pub fn ran(&self, phase: CyclePhase) -> bool {
        self.phases.contains(&phase)
    }
}

/// Platform pieces the supervisor is assembled from.
pub struct Collaborators<Se, St, L, W, C, P> {
    pub sensor: Se,
    pub storage: St,
    pub listener: L,
    pub watchdog: W,
    pub clock: C,
    pub probe: P,
}

pub struct Supervisor<Se, St, L, W, C, P>
where
    Se: SensorPort,
    St: Storage,
    L: Listener,
    W: HardwareWatchdog,
    C: Clock,
    P: SystemProbe,
{
    sensor: Se,
    history: HistoryStore<St>,
    health: HealthMonitor,
    server: RequestServer<L>,
    watchdog: WatchdogGuard<W>,
    power: PowerScheduler,
    clock: C,
    probe: P,
    limits: SampleLimits,
    period: Duration,
    next_acquisition: Instant,
    /// Added to uptime when stamping readings without a wall clock.
    uptime_base: u32,
    serve_guard: Duration,
    max_consecutive_faults: u32,
    reset_budget: Duration,
    reset_pending: bool,
    cycles: u32,
}

impl<Se, St, L, W, C, P> Supervisor<Se, St, L, W, C, P>
where
    Se: SensorPort,
    St: Storage,
    L: Listener,
    W: HardwareWatchdog,
    C: Clock,
    P: SystemProbe,
{
    /// Validate the configuration, rebuild history from the persisted log
    /// and arm the watchdog. The first cycle acquires immediately.
    ///
    /// Without a wall clock, timestamps are seconds since boot offset past
    /// the newest persisted reading, so they keep increasing across resets.
    pub fn boot(config: &DeviceConfig, parts: Collaborators<Se, St, L, W, C, P>) -> Result<Self, ConfigError> {
        config.validate()?;
        let now = parts.clock.now();

        let mut history = HistoryStore::new(parts.storage, &config.storage, now);
        let mut health = HealthMonitor::new(&config.health, now);
        if let Err(fault) = history.reload() {
            error!("Persisted log unreadable ({}), starting with an empty window", fault);
            health.record_storage(Err(fault));
        }

        let uptime_base = match (parts.clock.unix_time(), history.latest()) {
            (None, Some(last)) => {
                let base = last.timestamp.saturating_add(config.sampling.period_secs);
                info!("No wall clock, timestamps continue from {}", base);
                base
            }
            _ => 0,
        };

        let mut watchdog = WatchdogGuard::new(parts.watchdog, config.watchdog.timeout());
        watchdog.arm(now);

        info!(
            "Supervisor up: sampling every {} s, window of {}",
            config.sampling.period_secs, config.storage.history_capacity
        );
        Ok(Self {
            sensor: parts.sensor,
            history,
            health,
            server: RequestServer::new(parts.listener, &config.server),
            watchdog,
            power: PowerScheduler::new(&config.power),
            clock: parts.clock,
            probe: parts.probe,
            limits: SampleLimits::from(&config.sampling),
            period: config.sampling.period(),
            next_acquisition: now,
            uptime_base,
            serve_guard: config.watchdog.serve_guard(),
            max_consecutive_faults: config.sampling.max_consecutive_faults,
            reset_budget: config.sampling.reset_budget(),
            reset_pending: false,
            cycles: 0,
        })
    }

    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::new();

        let started = self.clock.now();
        if self.reset_pending {
            let remaining = self.watchdog.remaining(started);
            if remaining >= self.reset_budget {
                report.enter(CyclePhase::ResetSensor);
                self.reset_sensor().await;
            } else {
                debug!("Sensor reset waits for a fresh watchdog period ({} ms left)", remaining.as_millis());
            }
        } else if started >= self.next_acquisition {
            report.enter(CyclePhase::Acquire);
            let timestamp = self.timestamp();
            let reading = self.acquire(timestamp).await;

            report.enter(CyclePhase::Buffer);
            self.history.append(reading);
            report.reading = Some(reading);
            self.schedule_next_acquisition(started);
        }

        let now = self.clock.now();
        if self.history.flush_due(now) {
            report.enter(CyclePhase::Flush);
            let result = self.history.flush(now);
            self.health.record_storage(result.map(|_| ()));
            report.flush = Some(result);
        }

        let now = self.clock.now();
        let remaining = self.watchdog.remaining(now);
        if remaining >= self.serve_guard {
            report.enter(CyclePhase::Serve);
            let ctx = ServeContext {
                history: &self.history,
                health: &self.health,
                probe: &self.probe,
                now,
            };
            report.serve = Some(self.server.poll(&ctx));
            self.health.set_connection(self.server.connection_state());
        } else {
            warn!("Skipping request service, {} ms left before watchdog reset", remaining.as_millis());
        }

        let now = self.clock.now();
        self.watchdog.feed(now);
        report.enter(CyclePhase::FeedWatchdog);

        if self.health.check_memory(&self.probe) == MemoryLevel::Emergency {
            self.relieve_memory();
        }
        let deadlines = Deadlines {
            next_acquisition: self.next_acquisition,
            next_flush: self.history.next_flush_at(),
            watchdog: self.watchdog.deadline(),
        };
        let work_pending = self.server.has_pending_work() || self.reset_pending;
        report.sleep = self.power.decide(now, &deadlines, work_pending);
        self.cycles = self.cycles.wrapping_add(1);
        report
    }

    async fn acquire(&mut self, timestamp: u32) -> Reading {
        let outcome = match self.sensor.read().await {
            Ok(sample) => self.limits.check(&sample).map(|()| sample),
            Err(fault) => Err(fault),
        };
        self.health.record_acquisition(outcome.map(|_| ()));

        match outcome {
            Ok(sample) => {
                let reading = Reading::from_sample(timestamp, &sample);
                debug!("Acquired {}", reading);
                reading
            }
            Err(fault) => {
                warn!("Acquisition failed: {}", fault);
                self.schedule_reset(fault);
                Reading::invalid(timestamp, fault)
            }
        }
    }

    /// Wall time when known, otherwise continued uptime.
    fn timestamp(&self) -> u32 {
        match self.clock.unix_time() {
            Some(secs) => secs,
            None => self.uptime_base.saturating_add(self.clock.now().as_secs() as u32),
        }
    }

    /// Queue a sensor reset after every run of `max_consecutive_faults` faults.
    fn schedule_reset(&mut self, fault: SensorFault) {
        let streak = self.health.consecutive_faults();
        if self.max_consecutive_faults == 0 || streak % self.max_consecutive_faults != 0 {
            return;
        }
        warn!("{} consecutive sensor faults (last: {}), sensor reset queued", streak, fault);
        self.reset_pending = true;
    }

    async fn reset_sensor(&mut self) {
        self.reset_pending = false;
        match self.sensor.reset().await {
            Ok(()) => info!("Sensor reset"),
            Err(fault) => error!("Sensor reset failed: {}", fault),
        }
    }

    /// Memory emergency: drop every session and shrink the pending queue.
    fn relieve_memory(&mut self) {
        let count = self.health.record_emergency();
        let sessions = self.server.shed_sessions();
        let dropped = self.history.relieve_memory();
        warn!(
            "Memory emergency #{}: closed {} sessions, dropped {} unflushed readings",
            count, sessions, dropped
        );
    }

    /// Keep the acquisition cadence; after a long stall restart it from now.
    fn schedule_next_acquisition(&mut self, started: Instant) {
        let next = self.next_acquisition + self.period;
        self.next_acquisition = if next <= started { started + self.period } else { next };
    }

    /// Carry out a sleep decision.
    pub async fn rest<I: IdleSleep>(&mut self, decision: SleepDecision, idle: &mut I) -> WakeReason {
        let (until, low_power) = match decision {
            SleepDecision::Busy => (self.clock.now(), false),
            SleepDecision::Idle { until } => (until, false),
            SleepDecision::Sleep { until } => (until, true),
        };
        let reason = idle.idle_until(until, low_power).await;
        if reason == WakeReason::Connection {
            debug!("Woken early by an incoming connection");
        }
        reason
    }

    /// Drive cycles forever. Only a hardware reset ends this loop.
    pub async fn run<I: IdleSleep>(&mut self, idle: &mut I) -> ! {
        loop {
            let report = self.run_cycle().await;
            self.rest(report.sleep, idle).await;
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        self.health.snapshot(self.clock.now(), &self.probe, &self.history)
    }

    pub fn history(&self) -> &HistoryStore<St> {
        &self.history
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    pub fn server(&self) -> &RequestServer<L> {
        &self.server
    }

    pub fn watchdog(&self) -> &WatchdogGuard<W> {
        &self.watchdog
    }

    pub fn next_acquisition(&self) -> Instant {
        self.next_acquisition
    }

    pub fn cycles(&self) -> u32 {
        self.cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::pin::pin;
    use core::task::{Context, Waker};

    use embassy_futures::block_on;

    use crate::error::SensorFault;
    use crate::sensors::SensorSample;
    use crate::storage::{Centi, RamStorage};
    use crate::testing::{
        FixedProbe, InstantIdle, ManualClock, MockListener, MockWatchdog, ScriptedSensor, StallingSensor, sample,
    };

    type TestSupervisor<Se> = Supervisor<Se, RamStorage, MockListener, MockWatchdog, ManualClock, FixedProbe>;

    fn boot_with<Se: SensorPort>(
        sensor: Se,
        storage: RamStorage,
        config: &DeviceConfig,
    ) -> (TestSupervisor<Se>, ManualClock, MockListener) {
        boot_with_heap(sensor, storage, config, FixedProbe::new(50_000, 100_000))
    }

    fn boot_with_heap<Se: SensorPort>(
        sensor: Se,
        storage: RamStorage,
        config: &DeviceConfig,
        probe: FixedProbe,
    ) -> (TestSupervisor<Se>, ManualClock, MockListener) {
        let clock = ManualClock::new();
        let listener = MockListener::new();
        let supervisor = Supervisor::boot(
            config,
            Collaborators {
                sensor,
                storage,
                listener: listener.clone(),
                watchdog: MockWatchdog::default(),
                clock: clock.clone(),
                probe,
            },
        )
        .unwrap();
        (supervisor, clock, listener)
    }

    fn period() -> Duration {
        DeviceConfig::default().sampling.period()
    }

    #[test]
    fn test_phases_run_in_order() {
        let (mut supervisor, _clock, _listener) =
            boot_with(ScriptedSensor::new(), RamStorage::new(), &DeviceConfig::default());
        let report = block_on(supervisor.run_cycle());
        assert_eq!(
            report.phases.as_slice(),
            [
                CyclePhase::Acquire,
                CyclePhase::Buffer,
                CyclePhase::Serve,
                CyclePhase::FeedWatchdog
            ],
            "first cycle acquires immediately, no flush due yet"
        );
        assert!(report.reading.is_some_and(|r| r.is_valid()));
    }

    #[test]
    fn test_watchdog_fed_every_cycle() {
        let (mut supervisor, clock, _listener) =
            boot_with(ScriptedSensor::new(), RamStorage::new(), &DeviceConfig::default());
        for _ in 0..5 {
            let report = block_on(supervisor.run_cycle());
            let feeds = report.phases.iter().filter(|p| **p == CyclePhase::FeedWatchdog).count();
            assert_eq!(feeds, 1, "exactly one feed per cycle");
            assert_eq!(report.phases.last(), Some(&CyclePhase::FeedWatchdog));
            clock.advance(Duration::from_secs(1));
        }
        assert_eq!(supervisor.watchdog().hardware().feeds(), 5);
        assert!(!supervisor.watchdog().is_overdue(clock.now()));
    }

    #[test]
    fn test_acquisition_waits_for_period() {
        let sensor = ScriptedSensor::new();
        let (mut supervisor, clock, _listener) = boot_with(sensor.clone(), RamStorage::new(), &DeviceConfig::default());
        block_on(supervisor.run_cycle());
        clock.advance(Duration::from_secs(5));
        let report = block_on(supervisor.run_cycle());
        assert!(!report.ran(CyclePhase::Acquire), "period has not elapsed");
        assert_eq!(sensor.reads(), 1);

        clock.advance(period());
        let report = block_on(supervisor.run_cycle());
        assert!(report.ran(CyclePhase::Acquire));
        assert_eq!(supervisor.next_acquisition(), Instant::from_secs(0) + period() + period());
    }

    #[test]
    fn test_sensor_fault_buffers_invalid_reading() {
        let sensor = ScriptedSensor::new();
        sensor.push(Err(SensorFault::Bus));
        let (mut supervisor, clock, _listener) = boot_with(sensor.clone(), RamStorage::new(), &DeviceConfig::default());

        clock.advance(Duration::from_secs(42));
        let report = block_on(supervisor.run_cycle());
        let invalid = report.reading.unwrap();
        assert!(!invalid.is_valid());
        assert_eq!(invalid.timestamp, 42, "fault keeps the cycle's timestamp");
        assert_eq!(invalid.fault, Some(SensorFault::Bus));

        clock.advance(period());
        let report = block_on(supervisor.run_cycle());
        assert!(report.reading.unwrap().is_valid(), "next cycle acquires normally");

        let window: std::vec::Vec<bool> = supervisor.history().buffer().iter().map(Reading::is_valid).collect();
        assert_eq!(window, [false, true]);
        assert_eq!(supervisor.snapshot().measurements_failed, 1);
    }

    #[test]
    fn test_out_of_range_sample_is_invalid() {
        let sensor = ScriptedSensor::new();
        sensor.push(Ok(SensorSample::new(9_000, Centi(2150), Centi(4000))));
        let (mut supervisor, _clock, _listener) = boot_with(sensor, RamStorage::new(), &DeviceConfig::default());
        let report = block_on(supervisor.run_cycle());
        assert_eq!(report.reading.unwrap().fault, Some(SensorFault::OutOfRange));
    }

    #[test]
    fn test_sensor_reset_after_consecutive_faults() {
        let sensor = ScriptedSensor::new();
        for _ in 0..3 {
            sensor.push(Err(SensorFault::Timeout));
        }
        let (mut supervisor, clock, _listener) = boot_with(sensor.clone(), RamStorage::new(), &DeviceConfig::default());
        for _ in 0..3 {
            let report = block_on(supervisor.run_cycle());
            assert!(report.ran(CyclePhase::Acquire));
            clock.advance(period());
        }
        assert_eq!(sensor.resets(), 0, "reset waits for a cycle of its own");

        // A whole period went by since the last feed, too little watchdog time is left.
        let report = block_on(supervisor.run_cycle());
        assert!(!report.ran(CyclePhase::ResetSensor));
        assert!(!report.ran(CyclePhase::Acquire), "queued reset comes before acquisition");
        assert_eq!(report.sleep, SleepDecision::Busy, "queued reset keeps the device awake");

        let report = block_on(supervisor.run_cycle());
        assert!(report.ran(CyclePhase::ResetSensor));
        assert!(!report.ran(CyclePhase::Acquire));
        assert_eq!(sensor.resets(), 1);

        let report = block_on(supervisor.run_cycle());
        assert!(report.ran(CyclePhase::Acquire), "acquisition resumes after the reset");
        assert!(report.reading.is_some_and(|r| r.is_valid()));
        assert_eq!(supervisor.health().consecutive_faults(), 0);
    }

    #[test]
    fn test_stalled_acquisition_starves_watchdog() {
        let (mut supervisor, clock, _listener) = boot_with(StallingSensor, RamStorage::new(), &DeviceConfig::default());
        let timeout = supervisor.watchdog().timeout();
        {
            let mut cycle = pin!(supervisor.run_cycle());
            let mut cx = Context::from_waker(Waker::noop());
            assert!(cycle.as_mut().poll(&mut cx).is_pending(), "read never completes");
            clock.advance(timeout);
            assert!(cycle.as_mut().poll(&mut cx).is_pending());
        }
        assert_eq!(supervisor.watchdog().hardware().feeds(), 0, "stalled cycle never feeds");
        assert!(supervisor.watchdog().is_overdue(clock.now()), "hardware reset is due");
    }

    /// Sensor whose read and reset each take `delay` of device time.
    struct SlowSensor {
        clock: ManualClock,
        delay: Duration,
        fault: Option<SensorFault>,
    }

    impl SensorPort for SlowSensor {
        async fn read(&mut self) -> Result<SensorSample, SensorFault> {
            self.clock.advance(self.delay);
            match self.fault {
                Some(fault) => Err(fault),
                None => Ok(sample(600)),
            }
        }

        async fn reset(&mut self) -> Result<(), SensorFault> {
            self.clock.advance(self.delay);
            Ok(())
        }
    }

    #[test]
    fn test_serve_skipped_near_watchdog_deadline() {
        let clock = ManualClock::new();
        let listener = MockListener::new();
        let config = DeviceConfig::default();
        let mut supervisor = Supervisor::boot(
            &config,
            Collaborators {
                sensor: SlowSensor {
                    clock: clock.clone(),
                    delay: Duration::from_millis(7_000),
                    fault: None,
                },
                storage: RamStorage::new(),
                listener: listener.clone(),
                watchdog: MockWatchdog::default(),
                clock: clock.clone(),
                probe: FixedProbe::new(50_000, 100_000),
            },
        )
        .unwrap();
        let conn = listener.connect("GET /test HTTP/1.1\r\n\r\n");

        let report = block_on(supervisor.run_cycle());
        assert!(!report.ran(CyclePhase::Serve), "watchdog outranks request service");
        assert!(report.ran(CyclePhase::FeedWatchdog));
        assert!(conn.output_text().is_empty());

        let report = block_on(supervisor.run_cycle());
        assert!(report.ran(CyclePhase::Serve), "fresh feed leaves time to serve");
    }

    #[test]
    fn test_slow_reset_never_overruns_watchdog() {
        let clock = ManualClock::new();
        let mut config = DeviceConfig::default();
        config.sampling.max_consecutive_faults = 1;
        let mut supervisor = Supervisor::boot(
            &config,
            Collaborators {
                sensor: SlowSensor {
                    clock: clock.clone(),
                    delay: Duration::from_millis(5_500),
                    fault: Some(SensorFault::NotReady),
                },
                storage: RamStorage::new(),
                listener: MockListener::new(),
                watchdog: MockWatchdog::default(),
                clock: clock.clone(),
                probe: FixedProbe::new(50_000, 100_000),
            },
        )
        .unwrap();

        let mut resets = 0;
        for cycle in 1..=4 {
            let deadline = supervisor.watchdog().deadline().unwrap();
            let report = block_on(supervisor.run_cycle());
            assert!(clock.now() < deadline, "cycle {cycle} fed after the watchdog deadline");
            assert!(
                !(report.ran(CyclePhase::Acquire) && report.ran(CyclePhase::ResetSensor)),
                "a slow read and a slow reset never share a watchdog period"
            );
            if report.ran(CyclePhase::ResetSensor) {
                resets += 1;
            }
        }
        assert!(resets >= 1, "the reset still happens");
    }

    #[test]
    fn test_timestamps_continue_after_reset() {
        let config = DeviceConfig::default();
        let mut before_reset = HistoryStore::new(RamStorage::new(), &config.storage, Instant::from_secs(0));
        before_reset.append(Reading::new(86_400, 500, Centi(2000), Centi(4000)));
        before_reset.flush(Instant::from_secs(0)).unwrap();

        let (mut supervisor, clock, _listener) =
            boot_with(ScriptedSensor::new(), before_reset.into_storage(), &config);
        let mut stamps = std::vec::Vec::new();
        for _ in 0..3 {
            let report = block_on(supervisor.run_cycle());
            stamps.push(report.reading.unwrap().timestamp);
            clock.advance(period());
        }
        assert_eq!(stamps, [87_300, 88_200, 89_100], "uptime continues past the persisted log");
        assert_eq!(supervisor.history().stats().clamped_timestamps, 0);
    }

    #[test]
    fn test_unreadable_log_boots_empty() {
        let config = DeviceConfig::default();
        let mut earlier = HistoryStore::new(RamStorage::new(), &config.storage, Instant::from_secs(0));
        earlier.append(Reading::new(10, 500, Centi(2000), Centi(4000)));
        earlier.flush(Instant::from_secs(0)).unwrap();
        let mut storage = earlier.into_storage();
        storage.fail_reads(true);

        let (mut supervisor, _clock, _listener) = boot_with(ScriptedSensor::new(), storage, &config);
        assert!(supervisor.history().buffer().is_empty(), "window starts empty");
        assert_eq!(supervisor.snapshot().last_storage_fault, Some(StorageFault::Read.code()));

        let report = block_on(supervisor.run_cycle());
        assert!(report.reading.is_some_and(|r| r.is_valid()), "device keeps acquiring");
        assert!(report.ran(CyclePhase::FeedWatchdog));
    }

    #[test]
    fn test_memory_emergency_sheds_load() {
        let (mut supervisor, clock, listener) = boot_with_heap(
            ScriptedSensor::new(),
            RamStorage::new(),
            &DeviceConfig::default(),
            FixedProbe::new(5_000, 100_000),
        );
        let idle = listener.connect("");

        let report = block_on(supervisor.run_cycle());
        assert_eq!(report.serve.map(|s| s.accepted), Some(1));
        assert!(idle.is_closed(), "sessions are dropped in a memory emergency");
        assert_eq!(supervisor.server().active_sessions(), 0);
        assert_eq!(supervisor.health().memory_emergencies(), 1);
        assert_eq!(supervisor.snapshot().memory_emergencies, 1);
        assert!(supervisor.history().flush_due(clock.now()), "pending readings go out right away");
        assert_eq!(report.sleep, SleepDecision::Busy);

        let report = block_on(supervisor.run_cycle());
        assert_eq!(report.flush, Some(Ok(1)));
        assert_eq!(supervisor.history().pending_len(), 0);
    }

    #[test]
    fn test_flush_when_due() {
        let (mut supervisor, clock, _listener) =
            boot_with(ScriptedSensor::new(), RamStorage::new(), &DeviceConfig::default());
        block_on(supervisor.run_cycle());
        assert_eq!(supervisor.history().pending_len(), 1);

        clock.advance(DeviceConfig::default().storage.flush_interval());
        let report = block_on(supervisor.run_cycle());
        assert!(report.ran(CyclePhase::Flush));
        assert_eq!(report.flush, Some(Ok(2)));
        assert_eq!(supervisor.history().pending_len(), 0);
    }

    #[test]
    fn test_boot_reloads_window() {
        let (mut supervisor, clock, _listener) =
            boot_with(ScriptedSensor::new(), RamStorage::new(), &DeviceConfig::default());
        for _ in 0..3 {
            block_on(supervisor.run_cycle());
            clock.advance(period());
        }
        block_on(supervisor.run_cycle());
        let before: std::vec::Vec<Reading> = supervisor.history().buffer().iter().copied().collect();
        assert_eq!(supervisor.history().pending_len(), 0, "flush ran with the last acquisition");

        let Supervisor { history, .. } = supervisor;
        let (rebooted, _, _) = boot_with(ScriptedSensor::new(), history.into_storage(), &DeviceConfig::default());
        let after: std::vec::Vec<Reading> = rebooted.history().buffer().iter().copied().collect();
        assert_eq!(after, before);
    }

    #[test]
    fn test_serves_live_reading() {
        let (mut supervisor, _clock, listener) =
            boot_with(ScriptedSensor::new(), RamStorage::new(), &DeviceConfig::default());
        let conn = listener.connect("GET /api/live HTTP/1.1\r\n\r\n");
        block_on(supervisor.run_cycle());
        block_on(supervisor.run_cycle());
        let response = conn.output_text();
        assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
        assert!(response.contains(r#""co2_ppm":600"#));
        assert!(conn.is_closed());
    }

    #[test]
    fn test_rest_sleeps_until_next_deadline() {
        let (mut supervisor, clock, _listener) =
            boot_with(ScriptedSensor::new(), RamStorage::new(), &DeviceConfig::default());
        let report = block_on(supervisor.run_cycle());
        let SleepDecision::Sleep { until } = report.sleep else {
            panic!("idle device should sleep, got {:?}", report.sleep);
        };
        assert!(until <= supervisor.watchdog().deadline().unwrap(), "wakes before the feed deadline");

        let mut idle = InstantIdle::new(clock.clone());
        let reason = block_on(supervisor.rest(report.sleep, &mut idle));
        assert_eq!(reason, WakeReason::Timer);
        assert_eq!(clock.now(), until);
        assert_eq!(idle.waits, [(until, true)]);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = DeviceConfig::default();
        config.storage.history_capacity = 0;
        let result = Supervisor::boot(
            &config,
            Collaborators {
                sensor: ScriptedSensor::new(),
                storage: RamStorage::new(),
                listener: MockListener::new(),
                watchdog: MockWatchdog::default(),
                clock: ManualClock::new(),
                probe: FixedProbe::new(1, 1),
            },
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
