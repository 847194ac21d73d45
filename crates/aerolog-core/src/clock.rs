//! Time source
//!
//! Monotonic time drives every deadline. Wall-clock time, when the platform
//! knows it (NTP, RTC), only stamps readings.

use embassy_time::Instant;

pub trait Clock {
    fn now(&self) -> Instant;

    /// Seconds since the Unix epoch, if known.
    fn unix_time(&self) -> Option<u32> {
        None
    }
}

/// [`Clock`] over the embassy time driver.
///
/// Once [`anchor`](Self::anchor)ed to a known wall time, `unix_time` counts
/// forward from it with the monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbassyClock {
    anchor: Option<(Instant, u32)>,
}

impl EmbassyClock {
    pub const fn new() -> Self {
        Self { anchor: None }
    }

    pub fn anchor(&mut self, unix_secs: u32) {
        self.anchor = Some((Instant::now(), unix_secs));
    }
}

impl Clock for EmbassyClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_time(&self) -> Option<u32> {
        self.anchor
            .map(|(at, secs)| secs.wrapping_add(Instant::now().duration_since(at).as_secs() as u32))
    }
}
