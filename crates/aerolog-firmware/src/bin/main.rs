#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use aerolog_core::clock::EmbassyClock;
use aerolog_core::config::DeviceConfig;
use aerolog_core::storage::RamStorage;
use aerolog_core::supervisor::{Collaborators, Supervisor};
use aerolog_firmware::async_i2c_bus::AsyncI2cDevice;
use aerolog_firmware::hardware::{create_i2c_bus, init_sd_card, power_up_rails};
use aerolog_firmware::net::{POOL_SIZE, PoolListener, SocketPool, net_task, wifi_task};
use aerolog_firmware::sd_storage::SdStorage;
use aerolog_firmware::sensors::ClimateSensor;
use aerolog_firmware::system::{HeapProbe, NetIdle, RtcWatchdog};
use embassy_executor::Spawner;
use embassy_net::{Config as NetConfig, StackResources};
use embassy_time::Timer;
use esp_hal::clock::CpuClock;
use esp_hal::rng::Rng;
use esp_hal::rtc_cntl::Rtc;
use esp_hal::timer::timg::TimerGroup;
use log::{error, info, warn};
use static_cell::StaticCell;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    // The RTC watchdog resets the chip from here.
    loop {}
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

/// Persisted log file, or RAM when no card is inserted.
enum LogBackend {
    Sd(SdStorage<aerolog_firmware::hardware::BoardSdCard>),
    Ram(RamStorage),
}

impl aerolog_core::storage::Storage for LogBackend {
    fn append(&mut self, bytes: &[u8]) -> Result<(), aerolog_core::error::StorageFault> {
        match self {
            Self::Sd(s) => s.append(bytes),
            Self::Ram(s) => s.append(bytes),
        }
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, aerolog_core::error::StorageFault> {
        match self {
            Self::Sd(s) => s.read_at(offset, buf),
            Self::Ram(s) => s.read_at(offset, buf),
        }
    }

    fn len(&self) -> u64 {
        match self {
            Self::Sd(s) => s.len(),
            Self::Ram(s) => s.len(),
        }
    }

    fn truncate(&mut self, len: u64) -> Result<(), aerolog_core::error::StorageFault> {
        match self {
            Self::Sd(s) => s.truncate(len),
            Self::Ram(s) => s.truncate(len),
        }
    }

    fn discard_before(&mut self, offset: u64) -> Result<(), aerolog_core::error::StorageFault> {
        match self {
            Self::Sd(s) => s.discard_before(offset),
            Self::Ram(s) => s.discard_before(offset),
        }
    }
}

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);
    esp_alloc::heap_allocator!(size: 64 * 1024);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);
    info!("Embassy initialized");

    let device_config = DeviceConfig::default();

    // -- Board -------------------------------------------------------------

    let Some(i2c_bus) = create_i2c_bus(peripherals.I2C0, peripherals.GPIO12, peripherals.GPIO11) else {
        panic!("internal I2C bus unavailable");
    };
    power_up_rails(i2c_bus).await;

    let sensor = ClimateSensor::new(AsyncI2cDevice::new(i2c_bus), AsyncI2cDevice::new(i2c_bus));

    let storage = match init_sd_card(
        peripherals.SPI2,
        peripherals.GPIO36,
        peripherals.GPIO37,
        peripherals.GPIO35,
        peripherals.GPIO4,
    )
    .map(SdStorage::mount)
    {
        Some(Ok(sd)) => LogBackend::Sd(sd),
        Some(Err(fault)) => {
            warn!("SD card unusable ({}), history is RAM only", fault);
            LogBackend::Ram(RamStorage::new())
        }
        None => LogBackend::Ram(RamStorage::new()),
    };

    // -- Network -----------------------------------------------------------

    static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
    static NET_RESOURCES: StaticCell<StackResources<{ POOL_SIZE + 2 }>> = StaticCell::new();

    let radio = match esp_radio::init() {
        Ok(radio) => RADIO.init(radio),
        Err(e) => panic!("radio init failed: {:?}", e),
    };
    let (wifi_controller, interfaces) = match esp_radio::wifi::new(radio, peripherals.WIFI, Default::default()) {
        Ok(wifi) => wifi,
        Err(e) => panic!("Wi-Fi init failed: {:?}", e),
    };

    let rng = Rng::new();
    let seed = (rng.random() as u64) << 32 | rng.random() as u64;
    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        NetConfig::dhcpv4(Default::default()),
        NET_RESOURCES.init(StackResources::new()),
        seed,
    );
    if spawner.spawn(net_task(runner)).is_err() || spawner.spawn(wifi_task(wifi_controller)).is_err() {
        error!("Network tasks could not be spawned, serving is disabled");
    }

    let pool = SocketPool::init(stack, device_config.server.port);

    // -- Supervisor --------------------------------------------------------

    let parts = Collaborators {
        sensor,
        storage,
        listener: PoolListener::new(stack, pool),
        watchdog: RtcWatchdog::new(Rtc::new(peripherals.LPWR)),
        clock: EmbassyClock::new(),
        probe: HeapProbe,
    };

    let mut supervisor = match Supervisor::boot(&device_config, parts) {
        Ok(supervisor) => supervisor,
        Err(e) => {
            error!("Boot failed: {}", e);
            loop {
                Timer::after_secs(60).await;
            }
        }
    };

    info!("aerolog up");
    let mut idle = NetIdle::new(pool);
    supervisor.run(&mut idle).await
}
