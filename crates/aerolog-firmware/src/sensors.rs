//! SHT40 + SCD41 climate sensor
//!
//! Temperature and humidity come from the SHT40, CO₂ from the SCD41. The two
//! are read back to back and reported as one sample.

use aerolog_core::error::SensorFault;
use aerolog_core::sensors::{SensorPort, SensorSample};
use aerolog_core::storage::Centi;
use embassy_time::{Delay, Timer};
use embedded_hal_async::i2c::I2c;
use log::{error, info, warn};
use scd41_embedded::r#async::Scd41Async;
use sht4x::Sht4xAsync;

/// The SCD41 produces a new CO₂ value every 5 s in periodic mode.
const CO2_MEASUREMENT_INTERVAL_MS: u64 = 5000;

pub struct ClimateSensor<I> {
    sht40: Sht4xAsync<I, Delay>,
    scd41: Scd41Async<I, Delay>,
    scd41_running: bool,
}

impl<I: I2c> ClimateSensor<I> {
    pub fn new(sht40_i2c: I, scd41_i2c: I) -> Self {
        Self {
            sht40: Sht4xAsync::<I, Delay>::new(sht40_i2c),
            scd41: Scd41Async::<I, Delay>::new(scd41_i2c, Delay),
            scd41_running: false,
        }
    }

    /// Enable self-calibration and start periodic measurement.
    async fn start_scd41(&mut self) -> Result<(), SensorFault> {
        // Fails harmlessly when no measurement was running.
        let _ = self.scd41.stop_periodic_measurement().await;

        self.scd41
            .set_automatic_self_calibration(true)
            .await
            .map_err(|_| SensorFault::Bus)?;
        self.scd41
            .start_periodic_measurement()
            .await
            .map_err(|_| SensorFault::Bus)?;

        self.scd41_running = true;
        info!("SCD41: periodic measurement started");
        Timer::after_millis(CO2_MEASUREMENT_INTERVAL_MS).await;
        Ok(())
    }

    async fn read_co2(&mut self) -> Result<u16, SensorFault> {
        if !self.scd41_running {
            self.start_scd41().await?;
        }

        let ready = self.scd41.data_ready().await.map_err(|_| SensorFault::Bus)?;
        if !ready {
            return Err(SensorFault::NotReady);
        }
        let measurement = self.scd41.measurement().await.map_err(|_| SensorFault::Bus)?;
        Ok(measurement.co2_ppm)
    }

    async fn read_climate(&mut self) -> Result<(Centi, Centi), SensorFault> {
        let measurement = self
            .sht40
            .measure(sht4x::Precision::High, &mut Delay)
            .await
            .map_err(|e| {
                error!("SHT40 measurement failed: {:?}", e);
                SensorFault::Bus
            })?;

        let temperature = measurement.temperature_celsius().to_num::<f32>();
        let humidity = measurement.humidity_percent().to_num::<f32>();
        Ok((
            Centi((temperature * 100.0) as i32),
            Centi((humidity * 100.0) as i32),
        ))
    }
}

impl<I: I2c> SensorPort for ClimateSensor<I> {
    async fn read(&mut self) -> Result<SensorSample, SensorFault> {
        let (temperature, humidity) = self.read_climate().await?;
        let co2_ppm = self.read_co2().await?;
        Ok(SensorSample::new(co2_ppm, temperature, humidity))
    }

    async fn reset(&mut self) -> Result<(), SensorFault> {
        warn!("Restarting SCD41 measurement");
        self.scd41_running = false;
        self.start_scd41().await
    }
}
