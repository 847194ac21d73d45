use core::fmt::{self, Write};

use serde::{Deserialize, Serialize};

use crate::error::SensorFault;
use crate::metrics::Assessment;
use crate::sensors::SensorSample;

/// Column order of CSV exports.
pub const CSV_HEADER: &str = "timestamp,co2_ppm,temperature_c,humidity_pct,valid";

/// Fixed-point value in hundredths (`2150` is `21.5`).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct Centi(pub i32);

impl Centi {
    pub fn to_f32(self) -> f32 {
        self.0 as f32 / 100.0
    }
}

impl fmt::Display for Centi {
    /// Always at least one decimal digit, never a trailing zero beyond it.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let (whole, frac) = (abs / 100, abs % 100);
        if frac % 10 == 0 {
            write!(f, "{sign}{whole}.{}", frac / 10)
        } else {
            write!(f, "{sign}{whole}.{frac:02}")
        }
    }
}

/// One timestamped acquisition result.
///
/// Field order is part of the persisted format: timestamp, co2, temperature,
/// humidity, fault marker.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    /// Seconds since epoch when wall time is known, otherwise since boot
    pub timestamp: u32,
    pub co2_ppm: u16,
    pub temperature: Centi,
    pub humidity: Centi,
    /// `Some` marks an invalid reading whose measurement fields are zero
    pub fault: Option<SensorFault>,
}

impl Reading {
    pub const fn new(timestamp: u32, co2_ppm: u16, temperature: Centi, humidity: Centi) -> Self {
        Self {
            timestamp,
            co2_ppm,
            temperature,
            humidity,
            fault: None,
        }
    }

    /// Placeholder for a failed acquisition; still occupies a slot.
    pub const fn invalid(timestamp: u32, fault: SensorFault) -> Self {
        Self {
            timestamp,
            co2_ppm: 0,
            temperature: Centi(0),
            humidity: Centi(0),
            fault: Some(fault),
        }
    }

    pub fn from_sample(timestamp: u32, sample: &SensorSample) -> Self {
        Self::new(timestamp, sample.co2_ppm, sample.temperature, sample.humidity)
    }

    pub fn is_valid(&self) -> bool {
        self.fault.is_none()
    }

    /// Append one CSV row (with trailing newline) in [`CSV_HEADER`] order.
    pub fn write_csv_row<W: Write>(&self, out: &mut W) -> fmt::Result {
        writeln!(
            out,
            "{},{},{},{},{}",
            self.timestamp,
            self.co2_ppm,
            self.temperature,
            self.humidity,
            self.is_valid()
        )
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fault {
            None => write!(
                f,
                "t={} co2={}ppm temp={}C rh={}%",
                self.timestamp, self.co2_ppm, self.temperature, self.humidity
            ),
            Some(fault) => write!(f, "t={} invalid ({})", self.timestamp, fault.code()),
        }
    }
}

/// JSON rendering of a [`Reading`] for the HTTP API and JSON export.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ReadingJson {
    pub timestamp: u32,
    pub co2_ppm: u16,
    pub temperature_c: f32,
    pub humidity_pct: f32,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<Assessment>,
}

impl ReadingJson {
    /// Same rendering with the air quality grades attached.
    pub fn assessed(reading: &Reading) -> Self {
        Self {
            quality: Assessment::of(reading),
            ..Self::from(reading)
        }
    }
}

impl From<&Reading> for ReadingJson {
    fn from(reading: &Reading) -> Self {
        Self {
            timestamp: reading.timestamp,
            co2_ppm: reading.co2_ppm,
            temperature_c: reading.temperature.to_f32(),
            humidity_pct: reading.humidity.to_f32(),
            valid: reading.is_valid(),
            fault: reading.fault.map(SensorFault::code),
            quality: None,
        }
    }
}
