//! Sensor capability and acquisition-side validation
//!
//! The engine only knows a sensor through [`SensorPort`]: one async read that
//! yields a [`SensorSample`] or a [`SensorFault`]. Bus drivers live with the
//! platform crates (the firmware wires an SHT40 + SCD41 pair, the simulator a
//! synthetic generator), so alternate sensors never touch the core.

mod validation;

pub use validation::SampleLimits;

use core::future::Future;

pub use crate::error::SensorFault;
use crate::storage::Centi;

/// Raw values from one successful sensor transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorSample {
    pub co2_ppm: u16,
    pub temperature: Centi,
    pub humidity: Centi,
}

impl SensorSample {
    pub const fn new(co2_ppm: u16, temperature: Centi, humidity: Centi) -> Self {
        Self {
            co2_ppm,
            temperature,
            humidity,
        }
    }
}

/// Trait for sensors that feed the acquisition step.
///
/// `read` may await bus transactions (each await is a yield point) but must
/// return within the watchdog timeout; faults are values, never panics.
pub trait SensorPort {
    fn read(&mut self) -> impl Future<Output = Result<SensorSample, SensorFault>>;

    /// Re-initialize the sensor after repeated faults.
    fn reset(&mut self) -> impl Future<Output = Result<(), SensorFault>> {
        async { Ok(()) }
    }
}
