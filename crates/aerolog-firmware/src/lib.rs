//! ESP32-S3 firmware-specific modules for aerolog
//!
//! Everything here binds aerolog-core's platform traits to real peripherals:
//! the SHT40/SCD41 pair on I2C, the SD card log, the embassy-net socket pool,
//! the RTC watchdog and the esp-alloc heap.

#![no_std]

extern crate alloc;

pub mod async_i2c_bus;
pub mod hardware;
pub mod net;
pub mod sd_storage;
pub mod sensors;
pub mod system;
