//! Hardware-independent core library for aerolog
//!
//! This crate contains all platform-agnostic logic for the aerolog air-quality
//! logger: the bounded reading history and its append-only persisted log, the
//! cooperative HTTP request server, health reporting, watchdog bookkeeping,
//! power scheduling and the supervisor that drives them cycle by cycle.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets (ESP32-S3) and desktop hosts (for the simulator and tests).

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod backoff;
pub mod clock;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod power;
pub mod sensors;
pub mod server;
pub mod storage;
pub mod supervisor;
pub mod watchdog;

#[cfg(test)]
pub(crate) mod testing;
