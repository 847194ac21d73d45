//! Board bring-up for the M5Stack CoreS3
//!
//! Order matters: the power management chip has to switch the peripheral
//! rails on before the SD card or the sensors answer.

use axp2101_embedded::AsyncAxp2101;
use embassy_time::Delay;
use embedded_hal_bus::spi::ExclusiveDevice;
use embedded_sdmmc::SdCard;
use esp_hal::gpio::{Level, Output, OutputConfig};
use esp_hal::i2c::master::{Config as I2cConfig, I2c};
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::time::Rate;
use esp_hal::{Async, Blocking};
use log::{info, warn};
use static_cell::StaticCell;

use crate::async_i2c_bus::{AsyncI2cDevice, SharedBus};

pub type I2cBus = I2c<'static, Async>;
pub type SensorI2c = AsyncI2cDevice<'static, I2cBus>;
pub type SdSpi = ExclusiveDevice<Spi<'static, Blocking>, Output<'static>, Delay>;
pub type BoardSdCard = SdCard<SdSpi, Delay>;

/// Create the internal I2C bus (400 kHz) and share it.
pub fn create_i2c_bus(
    i2c0: esp_hal::peripherals::I2C0<'static>,
    sda: esp_hal::peripherals::GPIO12<'static>,
    scl: esp_hal::peripherals::GPIO11<'static>,
) -> Option<&'static SharedBus<I2cBus>> {
    static I2C0_BUS: StaticCell<SharedBus<I2cBus>> = StaticCell::new();

    let i2c = match I2c::new(i2c0, I2cConfig::default().with_frequency(Rate::from_khz(400))) {
        Ok(i2c) => i2c.with_sda(sda).with_scl(scl).into_async(),
        Err(e) => {
            warn!("I2C bus config rejected: {:?}", e);
            return None;
        }
    };
    Some(I2C0_BUS.init(SharedBus::new(i2c)))
}

/// Switch on every LDO the SD slot and the Grove port hang off.
///
/// A rail that fails to come up is logged; the matching peripheral will then
/// report faults through the normal paths.
pub async fn power_up_rails(bus: &'static SharedBus<I2cBus>) {
    let mut pmu = AsyncAxp2101::new(AsyncI2cDevice::new(bus));
    if let Err(e) = pmu.init().await {
        warn!("Power management init failed: {:?}", e);
        return;
    }

    let results = [
        pmu.enable_aldo1().await,
        pmu.enable_aldo2().await,
        pmu.enable_aldo3().await,
        pmu.enable_aldo4().await,
        pmu.enable_bldo1().await,
        pmu.enable_bldo2().await,
        pmu.enable_dldo1().await,
        pmu.set_aldo4_voltage(3300).await,
    ];
    let failed = results.iter().filter(|r| r.is_err()).count();
    if failed == 0 {
        info!("Power rails up");
    } else {
        warn!("{} power rail commands failed", failed);
    }
}

/// SD card on SPI2, clocked at 400 kHz.
pub fn init_sd_card(
    spi2: esp_hal::peripherals::SPI2<'static>,
    sck: esp_hal::peripherals::GPIO36<'static>,
    mosi: esp_hal::peripherals::GPIO37<'static>,
    miso: esp_hal::peripherals::GPIO35<'static>,
    cs: esp_hal::peripherals::GPIO4<'static>,
) -> Option<BoardSdCard> {
    let spi = match Spi::new(spi2, SpiConfig::default().with_frequency(Rate::from_khz(400))) {
        Ok(spi) => spi.with_sck(sck).with_mosi(mosi).with_miso(miso),
        Err(e) => {
            warn!("SPI config rejected: {:?}", e);
            return None;
        }
    };
    let cs = Output::new(cs, Level::High, OutputConfig::default());
    let device = match ExclusiveDevice::new(spi, cs, Delay) {
        Ok(device) => device,
        Err(e) => {
            warn!("SD chip select unavailable: {:?}", e);
            return None;
        }
    };
    Some(SdCard::new(device, Delay))
}
