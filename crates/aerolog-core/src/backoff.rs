//! Exponential backoff for link recovery

use embassy_time::{Duration, Instant};

/// Doubling retry delay between `base` and `max`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    current: Duration,
    next_attempt: Option<Instant>,
    attempts: u32,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: base,
            next_attempt: None,
            attempts: 0,
        }
    }

    /// True when no retry is scheduled or its time has come.
    pub fn ready(&self, now: Instant) -> bool {
        self.next_attempt.is_none_or(|at| now >= at)
    }

    /// Record a failed attempt at `now` and schedule the next one.
    pub fn failed(&mut self, now: Instant) -> Duration {
        let delay = self.current;
        self.next_attempt = Some(now + delay);
        self.attempts += 1;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
        self.next_attempt = None;
        self.attempts = 0;
    }

    pub fn next_attempt(&self) -> Option<Instant> {
        self.next_attempt
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
