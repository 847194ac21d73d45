//! Air quality assessment for readings
//!
//! Grades each measured quantity against common indoor comfort ranges. The
//! grades are attached to the live reading so clients do not have to carry
//! their own thresholds.

use serde::Serialize;

use crate::storage::Reading;

/// Measured quantity being assessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Co2,
    Temperature,
    Humidity,
}

/// Quality level assessment for sensor readings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    /// Optimal conditions
    Excellent,
    /// Acceptable conditions
    Good,
    /// Sub-optimal conditions
    Poor,
    /// Problematic conditions
    Bad,
}

impl QualityLevel {
    /// Assess quality level for a value in display units (ppm, °C, %).
    pub fn assess(quantity: Quantity, value: f32) -> Self {
        match quantity {
            Quantity::Co2 => {
                // Outdoor air sits near 420 ppm; 1000 is the usual ventilation
                // warning and 2000 the danger level.
                if value < 800.0 {
                    Self::Excellent
                } else if value < 1000.0 {
                    Self::Good
                } else if value < 2000.0 {
                    Self::Poor
                } else {
                    Self::Bad
                }
            }
            Quantity::Temperature => {
                if (20.0..=24.0).contains(&value) {
                    Self::Excellent
                } else if (18.0..=26.0).contains(&value) {
                    Self::Good
                } else if (15.0..=30.0).contains(&value) {
                    Self::Poor
                } else {
                    Self::Bad
                }
            }
            Quantity::Humidity => {
                if (40.0..=60.0).contains(&value) {
                    Self::Excellent
                } else if (30.0..=70.0).contains(&value) {
                    Self::Good
                } else if (20.0..=80.0).contains(&value) {
                    Self::Poor
                } else {
                    Self::Bad
                }
            }
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Excellent => "Excellent",
            Self::Good => "Good",
            Self::Poor => "Poor",
            Self::Bad => "Bad",
        }
    }
}

/// Per-quantity grades for one valid reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Assessment {
    pub co2: QualityLevel,
    pub temperature: QualityLevel,
    pub humidity: QualityLevel,
}

impl Assessment {
    /// `None` for fault readings, which carry no values to grade.
    pub fn of(reading: &Reading) -> Option<Self> {
        if !reading.is_valid() {
            return None;
        }
        Some(Self {
            co2: QualityLevel::assess(Quantity::Co2, reading.co2_ppm as f32),
            temperature: QualityLevel::assess(Quantity::Temperature, reading.temperature.to_f32()),
            humidity: QualityLevel::assess(Quantity::Humidity, reading.humidity.to_f32()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SensorFault;
    use crate::storage::Centi;

    #[test]
    fn test_co2_thresholds() {
        assert_eq!(QualityLevel::assess(Quantity::Co2, 450.0), QualityLevel::Excellent);
        assert_eq!(QualityLevel::assess(Quantity::Co2, 999.0), QualityLevel::Good);
        assert_eq!(QualityLevel::assess(Quantity::Co2, 1000.0), QualityLevel::Poor);
        assert_eq!(QualityLevel::assess(Quantity::Co2, 2500.0), QualityLevel::Bad);
    }

    #[test]
    fn test_fault_reading_has_no_assessment() {
        let reading = Reading::invalid(10, SensorFault::Bus);
        assert!(Assessment::of(&reading).is_none());
    }

    #[test]
    fn test_assessment_of_comfortable_room() {
        let reading = Reading::new(10, 600, Centi(2150), Centi(4500));
        let assessment = Assessment::of(&reading).unwrap();
        assert_eq!(assessment.temperature, QualityLevel::Excellent);
        assert_eq!(assessment.humidity.label(), "Excellent");
    }
}
