//! Watchdog bookkeeping
//!
//! The hardware watchdog resets the device when it is not fed within its
//! timeout. [`WatchdogGuard`] mirrors that deadline in software so the
//! supervisor can tell how much time is left and skip optional work when it
//! runs short.

use embassy_time::{Duration, Instant};
use log::{debug, info};

/// Platform watchdog peripheral.
pub trait HardwareWatchdog {
    fn enable(&mut self, timeout: Duration);
    fn feed(&mut self);
}

pub struct WatchdogGuard<W: HardwareWatchdog> {
    hardware: W,
    timeout: Duration,
    last_feed: Option<Instant>,
    feeds: u32,
}

impl<W: HardwareWatchdog> WatchdogGuard<W> {
    pub fn new(hardware: W, timeout: Duration) -> Self {
        Self {
            hardware,
            timeout,
            last_feed: None,
            feeds: 0,
        }
    }

    /// Start the hardware countdown.
    pub fn arm(&mut self, now: Instant) {
        self.hardware.enable(self.timeout);
        self.last_feed = Some(now);
        info!("Watchdog armed, timeout {} ms", self.timeout.as_millis());
    }

    pub fn feed(&mut self, now: Instant) {
        self.hardware.feed();
        self.last_feed = Some(now);
        self.feeds = self.feeds.wrapping_add(1);
        debug!("Watchdog fed");
    }

    pub fn is_armed(&self) -> bool {
        self.last_feed.is_some()
    }

    /// When the hardware fires unless fed. `None` before arming.
    pub fn deadline(&self) -> Option<Instant> {
        self.last_feed.map(|at| at + self.timeout)
    }

    /// Time left until the deadline; the full timeout when not armed.
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.deadline() {
            Some(deadline) => deadline.checked_duration_since(now).unwrap_or(Duration::from_ticks(0)),
            None => self.timeout,
        }
    }

    pub fn is_overdue(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn feeds(&self) -> u32 {
        self.feeds
    }

    pub fn hardware(&self) -> &W {
        &self.hardware
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockWatchdog;

    #[test]
    fn test_deadline_follows_feeds() {
        let mut guard = WatchdogGuard::new(MockWatchdog::default(), Duration::from_secs(8));
        assert_eq!(guard.deadline(), None);
        assert!(!guard.is_overdue(Instant::from_secs(100)), "unarmed guard never fires");

        guard.arm(Instant::from_secs(0));
        assert_eq!(guard.deadline(), Some(Instant::from_secs(8)));
        assert_eq!(guard.remaining(Instant::from_secs(3)), Duration::from_secs(5));

        guard.feed(Instant::from_secs(6));
        assert_eq!(guard.deadline(), Some(Instant::from_secs(14)));
        assert_eq!(guard.hardware().feeds(), 1);
        assert_eq!(guard.hardware().timeout(), Some(Duration::from_secs(8)));
    }

    #[test]
    fn test_overdue_after_timeout() {
        let mut guard = WatchdogGuard::new(MockWatchdog::default(), Duration::from_secs(8));
        guard.arm(Instant::from_secs(0));
        assert!(!guard.is_overdue(Instant::from_millis(7_999)));
        assert!(guard.is_overdue(Instant::from_secs(8)));
        assert_eq!(guard.remaining(Instant::from_secs(20)), Duration::from_ticks(0));
    }
}
