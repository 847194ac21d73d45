//! Idle scheduling
//!
//! Between cycles the device may idle, either with a plain timer wait or in a
//! low-power state. The wake time is always the earliest pending deadline, and
//! the watchdog deadline is pulled in by a safety margin so the device is
//! awake to feed it.

use core::future::Future;

use embassy_time::{Duration, Instant};

use crate::config::PowerConfig;

/// Deadlines the scheduler must not sleep through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    pub next_acquisition: Instant,
    pub next_flush: Instant,
    pub watchdog: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepDecision {
    /// Go straight into the next cycle.
    Busy,
    /// Wait without entering a low-power state.
    Idle { until: Instant },
    /// Enter the low-power state.
    Sleep { until: Instant },
}

impl SleepDecision {
    pub fn wake_at(&self) -> Option<Instant> {
        match *self {
            Self::Busy => None,
            Self::Idle { until } | Self::Sleep { until } => Some(until),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    Timer,
    /// A client is waiting to be accepted.
    Connection,
}

/// Platform idle primitive: timer wait or light sleep, woken early by an
/// incoming connection when the platform can detect one.
pub trait IdleSleep {
    fn idle_until(&mut self, until: Instant, low_power: bool) -> impl Future<Output = WakeReason>;
}

#[derive(Debug, Clone)]
pub struct PowerScheduler {
    low_power: bool,
    wake_margin: Duration,
    min_sleep: Duration,
    max_sleep: Duration,
}

impl PowerScheduler {
    pub fn new(config: &PowerConfig) -> Self {
        Self {
            low_power: config.low_power,
            wake_margin: Duration::from_millis(config.wake_margin_ms as u64),
            min_sleep: Duration::from_millis(config.min_sleep_ms as u64),
            max_sleep: Duration::from_millis(config.max_sleep_ms as u64),
        }
    }

    /// Decide how to spend the time until the next deadline.
    ///
    /// `work_pending` is true while sessions are open or a retry is queued;
    /// the device then stays awake.
    pub fn decide(&self, now: Instant, deadlines: &Deadlines, work_pending: bool) -> SleepDecision {
        if work_pending {
            return SleepDecision::Busy;
        }

        let mut wake = (now + self.max_sleep)
            .min(deadlines.next_acquisition)
            .min(deadlines.next_flush);
        if let Some(watchdog) = deadlines.watchdog {
            let margin_end = watchdog.checked_sub(self.wake_margin).unwrap_or(now);
            wake = wake.min(margin_end);
        }

        if wake <= now + self.min_sleep {
            SleepDecision::Busy
        } else if self.low_power {
            SleepDecision::Sleep { until: wake }
        } else {
            SleepDecision::Idle { until: wake }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler(low_power: bool) -> PowerScheduler {
        PowerScheduler::new(&PowerConfig {
            low_power,
            ..PowerConfig::default()
        })
    }

    fn deadlines(acquire: u64, flush: u64, watchdog: u64) -> Deadlines {
        Deadlines {
            next_acquisition: Instant::from_millis(acquire),
            next_flush: Instant::from_millis(flush),
            watchdog: Some(Instant::from_millis(watchdog)),
        }
    }

    #[test]
    fn test_pending_work_stays_busy() {
        let decision = scheduler(true).decide(Instant::from_millis(0), &deadlines(900_000, 900_000, 8_000), true);
        assert_eq!(decision, SleepDecision::Busy);
    }

    #[test]
    fn test_sleep_respects_watchdog_margin() {
        let now = Instant::from_millis(7_500);
        let decision = scheduler(true).decide(now, &deadlines(900_000, 900_000, 8_000 + 7_500), false);
        assert_eq!(
            decision,
            SleepDecision::Sleep {
                until: Instant::from_millis(8_500)
            },
            "max sleep caps the wait"
        );

        let decision = scheduler(true).decide(now, &deadlines(900_000, 900_000, 9_000), false);
        assert_eq!(
            decision,
            SleepDecision::Sleep {
                until: Instant::from_millis(8_000)
            },
            "wake one margin before the feed deadline"
        );
    }

    #[test]
    fn test_imminent_acquisition_is_busy() {
        let decision = scheduler(true).decide(Instant::from_millis(1_000), &deadlines(1_003, 900_000, 8_000), false);
        assert_eq!(decision, SleepDecision::Busy);
    }

    #[test]
    fn test_plain_idle_when_low_power_disabled() {
        let decision = scheduler(false).decide(Instant::from_millis(0), &deadlines(200, 900_000, 8_000), false);
        assert_eq!(
            decision,
            SleepDecision::Idle {
                until: Instant::from_millis(200)
            }
        );
    }

    #[test]
    fn test_watchdog_inside_margin_is_busy() {
        let decision = scheduler(true).decide(Instant::from_millis(7_500), &deadlines(900_000, 900_000, 8_000), false);
        assert_eq!(decision, SleepDecision::Busy, "feed is due, no time to sleep");
    }
}
