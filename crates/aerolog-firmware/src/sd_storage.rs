//! Persisted log on the SD card
//!
//! The log is a single FAT file. SD access is blocking SPI; one flush frame is
//! at most a few kilobytes, which stays well inside the watchdog period.
//!
//! FAT offers no in-place truncation or rename, so cutting the log copies the
//! kept range through a scratch file and back.

use aerolog_core::storage::{Storage, StorageFault};
use embedded_sdmmc::{BlockDevice, Mode, TimeSource, Timestamp, VolumeIdx, VolumeManager};
use log::{error, info, warn};

const LOG_FILE: &str = "AEROLOG.LOG";
const SCRATCH_FILE: &str = "AEROLOG.TMP";

/// Copy chunk for log rewrites; one SD block.
const COPY_CHUNK: usize = 512;

/// Fixed file timestamp; the device keeps no calendar.
pub struct NoCalendar;

impl TimeSource for NoCalendar {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 55,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

fn fault<E: core::fmt::Debug>(err: embedded_sdmmc::Error<E>, otherwise: StorageFault) -> StorageFault {
    match err {
        embedded_sdmmc::Error::NotEnoughSpace => StorageFault::Full,
        embedded_sdmmc::Error::DeviceError(e) => {
            error!("SD card error: {:?}", e);
            StorageFault::Unavailable
        }
        other => {
            warn!("SD filesystem error: {:?}", other);
            otherwise
        }
    }
}

pub struct SdStorage<D: BlockDevice> {
    volume_mgr: VolumeManager<D, NoCalendar, 4, 4, 1>,
    len: u64,
}

impl<D: BlockDevice> SdStorage<D>
where
    D::Error: core::fmt::Debug,
{
    /// Mount the first volume and measure the existing log.
    pub fn mount(device: D) -> Result<Self, StorageFault> {
        let mut storage = Self {
            volume_mgr: VolumeManager::new(device, NoCalendar),
            len: 0,
        };
        storage.len = storage.file_len()?;
        info!("SD card mounted, {} holds {} bytes", LOG_FILE, storage.len);
        Ok(storage)
    }

    /// Length of the log file as the directory entry records it.
    fn file_len(&self) -> Result<u64, StorageFault> {
        let volume = self
            .volume_mgr
            .open_volume(VolumeIdx(0))
            .map_err(|e| fault(e, StorageFault::Unavailable))?;
        let root = volume.open_root_dir().map_err(|e| fault(e, StorageFault::Unavailable))?;
        match root.open_file_in_dir(LOG_FILE, Mode::ReadOnly) {
            Ok(file) => Ok(file.length() as u64),
            Err(embedded_sdmmc::Error::NotFound) => Ok(0),
            Err(e) => Err(fault(e, StorageFault::Read)),
        }
    }

    fn write_at_end(&mut self, bytes: &[u8]) -> Result<(), StorageFault> {
        let volume = self
            .volume_mgr
            .open_volume(VolumeIdx(0))
            .map_err(|e| fault(e, StorageFault::Unavailable))?;
        let root = volume.open_root_dir().map_err(|e| fault(e, StorageFault::Unavailable))?;
        let file = root
            .open_file_in_dir(LOG_FILE, Mode::ReadWriteCreateOrAppend)
            .map_err(|e| fault(e, StorageFault::Write))?;
        file.write(bytes).map_err(|e| fault(e, StorageFault::Write))?;
        // Close updates the directory entry; until then the bytes are not committed.
        file.close().map_err(|e| fault(e, StorageFault::Write))
    }

    /// Replace the log with its `[start, end)` byte range.
    fn rewrite(&mut self, start: u64, end: u64) -> Result<(), StorageFault> {
        let volume = self
            .volume_mgr
            .open_volume(VolumeIdx(0))
            .map_err(|e| fault(e, StorageFault::Unavailable))?;
        let root = volume.open_root_dir().map_err(|e| fault(e, StorageFault::Unavailable))?;
        let mut chunk = [0u8; COPY_CHUNK];

        {
            let log = root
                .open_file_in_dir(LOG_FILE, Mode::ReadOnly)
                .map_err(|e| fault(e, StorageFault::Read))?;
            let scratch = root
                .open_file_in_dir(SCRATCH_FILE, Mode::ReadWriteCreateOrTruncate)
                .map_err(|e| fault(e, StorageFault::Write))?;
            log.seek_from_start(start as u32)
                .map_err(|e| fault(e, StorageFault::Read))?;

            let mut remaining = (end - start) as usize;
            while remaining > 0 {
                let want = remaining.min(COPY_CHUNK);
                let n = log
                    .read(&mut chunk[..want])
                    .map_err(|e| fault(e, StorageFault::Read))?;
                if n == 0 {
                    return Err(StorageFault::Read);
                }
                scratch
                    .write(&chunk[..n])
                    .map_err(|e| fault(e, StorageFault::Write))?;
                remaining -= n;
            }
            scratch.close().map_err(|e| fault(e, StorageFault::Write))?;
        }

        {
            let scratch = root
                .open_file_in_dir(SCRATCH_FILE, Mode::ReadOnly)
                .map_err(|e| fault(e, StorageFault::Read))?;
            let log = root
                .open_file_in_dir(LOG_FILE, Mode::ReadWriteCreateOrTruncate)
                .map_err(|e| fault(e, StorageFault::Write))?;
            loop {
                let n = scratch.read(&mut chunk).map_err(|e| fault(e, StorageFault::Read))?;
                if n == 0 {
                    break;
                }
                log.write(&chunk[..n])
                    .map_err(|e| fault(e, StorageFault::Write))?;
            }
            log.close().map_err(|e| fault(e, StorageFault::Write))?;
        }

        if let Err(e) = root.delete_file_in_dir(SCRATCH_FILE) {
            warn!("Scratch file left behind: {:?}", e);
        }
        self.len = end - start;
        Ok(())
    }
}

impl<D: BlockDevice> Storage for SdStorage<D>
where
    D::Error: core::fmt::Debug,
{
    fn append(&mut self, bytes: &[u8]) -> Result<(), StorageFault> {
        let Err(write_fault) = self.write_at_end(bytes) else {
            self.len += bytes.len() as u64;
            return Ok(());
        };

        // Part of the frame may have reached the card; cut back to the committed length.
        let committed = self.len;
        match self.file_len() {
            Ok(len) if len > committed => {
                warn!("Failed append left {} bytes, rolling back", len - committed);
                self.len = len;
                if let Err(e) = self.rewrite(0, committed) {
                    error!("Rollback of the log failed: {}", e);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Cannot measure the log after a failed append: {}", e),
        }
        Err(write_fault)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, StorageFault> {
        if offset >= self.len {
            return Ok(0);
        }
        let volume = self
            .volume_mgr
            .open_volume(VolumeIdx(0))
            .map_err(|e| fault(e, StorageFault::Unavailable))?;
        let root = volume.open_root_dir().map_err(|e| fault(e, StorageFault::Unavailable))?;
        let file = root
            .open_file_in_dir(LOG_FILE, Mode::ReadOnly)
            .map_err(|e| fault(e, StorageFault::Read))?;
        file.seek_from_start(offset as u32)
            .map_err(|e| fault(e, StorageFault::Read))?;
        file.read(buf).map_err(|e| fault(e, StorageFault::Read))
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn truncate(&mut self, len: u64) -> Result<(), StorageFault> {
        if len >= self.len {
            return Ok(());
        }
        self.rewrite(0, len)
    }

    fn discard_before(&mut self, offset: u64) -> Result<(), StorageFault> {
        if offset == 0 {
            return Ok(());
        }
        self.rewrite(offset.min(self.len), self.len)
    }
}
