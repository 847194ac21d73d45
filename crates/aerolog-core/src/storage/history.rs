use alloc::collections::VecDeque;
use core::ops::ControlFlow;

use embassy_time::{Duration, Instant};
use log::{debug, info, warn};

use super::frame::{encode_frame, for_each_frame};
use super::{
    ExportFormat, ExportStream, HistoryBuffer, Reading, Storage, StorageFault, WindowStats,
};
use crate::config::StorageConfig;

/// Unflushed readings kept when memory runs out and storage is failing.
const EMERGENCY_PENDING_KEEP: usize = 4;

/// Persistence counters reported through `/api/health`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub flushed_records: u32,
    pub frames_written: u32,
    pub failed_flushes: u32,
    pub consecutive_failures: u32,
    pub dropped_pending: u32,
    pub clamped_timestamps: u32,
    pub trimmed_bytes: u64,
    pub last_fault: Option<StorageFault>,
}

/// What [`HistoryStore::reload`] found in the persisted log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    pub frames: u32,
    pub records: u32,
    /// Bytes cut from a torn tail.
    pub truncated_bytes: u64,
}

/// Bounded in-memory history reconciled with the persisted log.
///
/// Only the acquisition path mutates the store. Request handling borrows it
/// shared, so a response never observes a half-updated ring.
pub struct HistoryStore<S: Storage> {
    storage: S,
    ring: HistoryBuffer,
    pending: VecDeque<Reading>,
    pending_limit: usize,
    flush_interval: Duration,
    last_flush_attempt: Instant,
    /// Flush at the next opportunity regardless of the interval.
    flush_requested: bool,
    max_log_bytes: u64,
    last_timestamp: Option<u32>,
    /// Committed length to restore before the next append, left by a failed
    /// append whose rollback also failed.
    dirty_tail: Option<u64>,
    /// Bumped whenever existing log bytes move, invalidating open exports.
    generation: u32,
    stats: StoreStats,
}

impl<S: Storage> HistoryStore<S> {
    pub fn new(storage: S, config: &StorageConfig, now: Instant) -> Self {
        Self {
            storage,
            ring: HistoryBuffer::new(config.history_capacity),
            pending: VecDeque::with_capacity(config.pending_limit),
            pending_limit: config.pending_limit,
            flush_interval: config.flush_interval(),
            last_flush_attempt: now,
            flush_requested: false,
            max_log_bytes: config.max_log_bytes,
            last_timestamp: None,
            dirty_tail: None,
            generation: 0,
            stats: StoreStats::default(),
        }
    }

    /// Buffer a reading in the ring and the pending queue.
    ///
    /// Timestamps never go backwards: an earlier one (clock step, RTC reset)
    /// is clamped to the last timestamp seen.
    pub fn append(&mut self, mut reading: Reading) {
        if let Some(last) = self.last_timestamp
            && reading.timestamp < last
        {
            warn!("Timestamp {} precedes {}, clamping", reading.timestamp, last);
            reading.timestamp = last;
            self.stats.clamped_timestamps += 1;
        }
        self.last_timestamp = Some(reading.timestamp);

        if self.pending.len() >= self.pending_limit
            && let Some(dropped) = self.pending.pop_front()
        {
            warn!("Pending queue full, dropping unflushed reading at t={}", dropped.timestamp);
            self.stats.dropped_pending += 1;
        }
        self.pending.push_back(reading);
        self.ring.push(reading);
    }

    pub fn flush_due(&self, now: Instant) -> bool {
        now >= self.next_flush_at()
    }

    pub fn next_flush_at(&self) -> Instant {
        if self.flush_requested {
            self.last_flush_attempt
        } else {
            self.last_flush_attempt + self.flush_interval
        }
    }

    /// Give back memory held by the pending queue.
    ///
    /// The next cycle flushes without waiting for the interval. While
    /// storage is failing, all but the newest few unflushed readings are
    /// dropped; they remain in the ring until evicted. Returns how many
    /// readings were dropped.
    pub fn relieve_memory(&mut self) -> usize {
        self.flush_requested = !self.pending.is_empty();
        let mut dropped = 0;
        if self.stats.consecutive_failures > 0 {
            while self.pending.len() > EMERGENCY_PENDING_KEEP {
                self.pending.pop_front();
                dropped += 1;
            }
        }
        self.pending.shrink_to_fit();
        self.stats.dropped_pending += dropped as u32;
        dropped
    }

    /// Write every pending reading as one frame.
    ///
    /// Returns the number of readings persisted; zero when nothing was
    /// pending, in which case storage is not touched. On failure the pending
    /// queue is kept for the next due flush and any bytes the failed append
    /// left behind are cut, so the log ends on a whole frame.
    pub fn flush(&mut self, now: Instant) -> Result<usize, StorageFault> {
        self.last_flush_attempt = now;
        self.flush_requested = false;
        if self.pending.is_empty() {
            return Ok(0);
        }

        let frame = encode_frame(self.pending.make_contiguous())?;
        let written = match self.append_frame(&frame) {
            Err(StorageFault::Full) => {
                warn!("Storage full, trimming log before retrying flush");
                let target = self.storage.len().min(self.max_log_bytes) * 3 / 4;
                self.trim_to(target)
                    .and_then(|()| self.append_frame(&frame))
            }
            result => result,
        };

        if let Err(fault) = written {
            self.stats.failed_flushes += 1;
            self.stats.consecutive_failures += 1;
            self.stats.last_fault = Some(fault);
            warn!(
                "Flush of {} readings failed: {} ({} in a row)",
                self.pending.len(),
                fault,
                self.stats.consecutive_failures
            );
            return Err(fault);
        }

        let count = self.pending.len();
        self.pending.clear();
        self.stats.flushed_records += count as u32;
        self.stats.frames_written += 1;
        self.stats.consecutive_failures = 0;
        debug!("Flushed {} readings ({} bytes)", count, frame.len());

        if self.storage.len() > self.max_log_bytes
            && let Err(fault) = self.trim_to(self.max_log_bytes * 3 / 4)
        {
            // The frame is committed; a failed trim is retried after the next flush.
            warn!("Log retention failed: {}", fault);
            self.stats.last_fault = Some(fault);
        }
        Ok(count)
    }

    /// Append one frame, or leave the log exactly as it was.
    fn append_frame(&mut self, frame: &[u8]) -> Result<(), StorageFault> {
        if let Some(committed) = self.dirty_tail {
            self.storage.truncate(committed)?;
            self.dirty_tail = None;
            info!("Cut leftover bytes of a failed append, log back to {} bytes", committed);
        }

        let committed = self.storage.len();
        let result = self.storage.append(frame);
        if result.is_err() && self.storage.len() > committed {
            let partial = self.storage.len() - committed;
            match self.storage.truncate(committed) {
                Ok(()) => debug!("Rolled back {} bytes of a failed append", partial),
                Err(fault) => {
                    warn!("Could not roll back {} bytes of a failed append: {}", partial, fault);
                    self.dirty_tail = Some(committed);
                }
            }
        }
        result
    }

    /// Rebuild the ring from the persisted log and drop a torn tail.
    ///
    /// Run once at boot before the first append.
    pub fn reload(&mut self) -> Result<ReloadSummary, StorageFault> {
        self.ring.clear();
        self.pending.clear();
        self.last_timestamp = None;
        self.dirty_tail = None;

        let mut summary = ReloadSummary::default();
        let ring = &mut self.ring;
        let scan = for_each_frame(&self.storage, self.storage.len(), |_, readings| {
            summary.frames += 1;
            summary.records += readings.len() as u32;
            for reading in readings {
                ring.push(reading);
            }
            ControlFlow::Continue(())
        })?;

        if scan.torn {
            summary.truncated_bytes = self.storage.len() - scan.valid_end;
            warn!(
                "Torn log tail at offset {}, truncating {} bytes",
                scan.valid_end, summary.truncated_bytes
            );
            self.storage.truncate(scan.valid_end)?;
            self.generation = self.generation.wrapping_add(1);
        }
        self.last_timestamp = self.ring.latest().map(|r| r.timestamp);

        info!(
            "Reloaded {} readings from {} frames, window holds {}",
            summary.records,
            summary.frames,
            self.ring.len()
        );
        Ok(summary)
    }

    /// Discard whole leading frames until the log is at most `target` bytes,
    /// never touching the frames that hold the current window.
    fn trim_to(&mut self, target: u64) -> Result<(), StorageFault> {
        let end = self.storage.len();
        if end <= target {
            return Ok(());
        }

        let mut total = 0usize;
        for_each_frame(&self.storage, end, |_, readings| {
            total += readings.len();
            ControlFlow::Continue(())
        })?;
        let keep = self.ring.capacity().min(total);

        let mut cut = 0;
        let mut before = 0usize;
        for_each_frame(&self.storage, end, |offset, readings| {
            cut = offset;
            if end - offset <= target || total - before - readings.len() < keep {
                return ControlFlow::Break(());
            }
            before += readings.len();
            ControlFlow::Continue(())
        })?;

        if cut == 0 {
            debug!("Retention: nothing outside the window to trim");
            return Ok(());
        }
        self.storage.discard_before(cut)?;
        if let Some(committed) = &mut self.dirty_tail {
            *committed = committed.saturating_sub(cut);
        }
        self.generation = self.generation.wrapping_add(1);
        self.stats.trimmed_bytes += cut;
        info!("Retention trimmed {} bytes, log now {} bytes", cut, self.storage.len());
        Ok(())
    }

    /// Start streaming the persisted log as it stands now.
    pub fn export(&self, format: ExportFormat) -> ExportStream {
        ExportStream::new(format, self.storage.len(), self.generation)
    }

    pub fn window_stats(&self) -> WindowStats {
        WindowStats::of(&self.ring)
    }

    pub fn buffer(&self) -> &HistoryBuffer {
        &self.ring
    }

    pub fn latest(&self) -> Option<&Reading> {
        self.ring.latest()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn log_len(&self) -> u64 {
        self.storage.len()
    }

    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }
}
