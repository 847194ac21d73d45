//! Statistics over the history window

use serde::Serialize;

use super::{HistoryBuffer, Reading};

/// Statistics for one quantity over a window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrendStats {
    /// Average value in raw units
    pub avg: i32,
    /// Minimum value in raw units
    pub min: i32,
    /// Maximum value in raw units
    pub max: i32,
    /// Number of samples
    pub count: usize,
}

impl TrendStats {
    /// `None` when `values` is empty.
    pub fn from_values(values: impl Iterator<Item = i32>) -> Option<Self> {
        let mut sum: i64 = 0;
        let mut stats = Self {
            avg: 0,
            min: i32::MAX,
            max: i32::MIN,
            count: 0,
        };
        for value in values {
            sum += value as i64;
            stats.min = stats.min.min(value);
            stats.max = stats.max.max(value);
            stats.count += 1;
        }
        if stats.count == 0 {
            return None;
        }
        stats.avg = (sum / stats.count as i64) as i32;
        Some(stats)
    }

    /// Convert to display units given the fixed-point divisor
    pub fn scaled(&self, divisor: f32) -> QuantityStats {
        QuantityStats {
            min: self.min as f32 / divisor,
            max: self.max as f32 / divisor,
            avg: self.avg as f32 / divisor,
        }
    }
}

/// Display-unit view of [`TrendStats`].
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct QuantityStats {
    pub min: f32,
    pub max: f32,
    pub avg: f32,
}

/// Min/max/avg of the valid readings currently in the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowStats {
    pub co2_ppm: Option<TrendStats>,
    /// Hundredths of a degree
    pub temperature: Option<TrendStats>,
    /// Hundredths of a percent
    pub humidity: Option<TrendStats>,
    pub samples: usize,
    pub invalid: usize,
    pub first_timestamp: Option<u32>,
    pub last_timestamp: Option<u32>,
}

impl WindowStats {
    pub fn of(buffer: &HistoryBuffer) -> Self {
        let valid = || buffer.iter().filter(|r| r.is_valid());
        Self {
            co2_ppm: TrendStats::from_values(valid().map(|r| r.co2_ppm as i32)),
            temperature: TrendStats::from_values(valid().map(|r| r.temperature.0)),
            humidity: TrendStats::from_values(valid().map(|r| r.humidity.0)),
            samples: buffer.len(),
            invalid: buffer.iter().filter(|r| !r.is_valid()).count(),
            first_timestamp: buffer.iter().next().map(|r: &Reading| r.timestamp),
            last_timestamp: buffer.latest().map(|r| r.timestamp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SensorFault;
    use crate::storage::Centi;

    #[test]
    fn test_empty_window() {
        let stats = WindowStats::of(&HistoryBuffer::new(4));
        assert_eq!(stats, WindowStats::default());
    }

    #[test]
    fn test_invalid_readings_are_excluded() {
        let mut buffer = HistoryBuffer::new(4);
        buffer.push(Reading::new(1, 400, Centi(2000), Centi(4000)));
        buffer.push(Reading::invalid(2, SensorFault::Bus));
        buffer.push(Reading::new(3, 600, Centi(2200), Centi(5000)));

        let stats = WindowStats::of(&buffer);
        let co2 = stats.co2_ppm.unwrap();
        assert_eq!((co2.min, co2.max, co2.avg, co2.count), (400, 600, 500, 2));
        assert_eq!(stats.invalid, 1);
        assert_eq!(stats.samples, 3);
        assert_eq!(stats.temperature.unwrap().scaled(100.0).avg, 21.0);
        assert_eq!(stats.first_timestamp, Some(1));
        assert_eq!(stats.last_timestamp, Some(3));
    }

    #[test]
    fn test_all_invalid_has_no_trends() {
        let mut buffer = HistoryBuffer::new(2);
        buffer.push(Reading::invalid(1, SensorFault::Timeout));
        let stats = WindowStats::of(&buffer);
        assert!(stats.co2_ppm.is_none(), "no valid sample, no statistics");
        assert_eq!(stats.invalid, 1);
    }
}
