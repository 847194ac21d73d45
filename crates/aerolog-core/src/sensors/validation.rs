use crate::config::SamplingConfig;
use crate::error::SensorFault;

use super::SensorSample;

/// Plausibility window applied to every sample before it is buffered.
///
/// Limits are held in the same fixed-point units as the sample (ppm,
/// hundredths of a degree, hundredths of a percent).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleLimits {
    co2_ppm: (u16, u16),
    temperature_centi: (i32, i32),
    humidity_centi: (i32, i32),
}

impl SampleLimits {
    pub fn check(&self, sample: &SensorSample) -> Result<(), SensorFault> {
        let within = |value: i32, (low, high): (i32, i32)| (low..=high).contains(&value);

        if !within(sample.co2_ppm as i32, (self.co2_ppm.0 as i32, self.co2_ppm.1 as i32))
            || !within(sample.temperature.0, self.temperature_centi)
            || !within(sample.humidity.0, self.humidity_centi)
        {
            return Err(SensorFault::OutOfRange);
        }
        Ok(())
    }
}

impl From<&SamplingConfig> for SampleLimits {
    fn from(config: &SamplingConfig) -> Self {
        let (t_low, t_high) = config.temperature_range_c;
        let (h_low, h_high) = config.humidity_range_pct;
        Self {
            co2_ppm: config.co2_range_ppm,
            temperature_centi: (t_low as i32 * 100, t_high as i32 * 100),
            humidity_centi: (h_low as i32 * 100, h_high as i32 * 100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Centi;

    fn limits() -> SampleLimits {
        SampleLimits::from(&SamplingConfig::default())
    }

    #[test]
    fn test_typical_indoor_sample_passes() {
        let sample = SensorSample::new(650, Centi(2150), Centi(4000));
        assert_eq!(limits().check(&sample), Ok(()));
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let sample = SensorSample::new(5000, Centi(5000), Centi(10000));
        assert_eq!(limits().check(&sample), Ok(()));
    }

    #[test]
    fn test_implausible_values_fault() {
        let low_co2 = SensorSample::new(120, Centi(2150), Centi(4000));
        let hot = SensorSample::new(650, Centi(5001), Centi(4000));
        let soaked = SensorSample::new(650, Centi(2150), Centi(10001));
        for sample in [low_co2, hot, soaked] {
            assert_eq!(limits().check(&sample), Err(SensorFault::OutOfRange), "{sample:?}");
        }
    }
}
