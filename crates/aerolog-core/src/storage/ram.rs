use alloc::vec::Vec;

use super::{Storage, StorageFault};

/// Volatile [`Storage`] backend.
///
/// Used when no durable medium is present and by tests, which can make it
/// fill up, fail or tear a write the way flash and SD media do.
#[derive(Debug, Default)]
pub struct RamStorage {
    data: Vec<u8>,
    limit: Option<usize>,
    failing_appends: u32,
    failing_reads: bool,
    failing_truncates: u32,
    tear_at: Option<usize>,
}

impl RamStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report [`StorageFault::Full`] once the log would exceed `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Fail the next `count` appends with [`StorageFault::Write`].
    pub fn fail_appends(&mut self, count: u32) {
        self.failing_appends = count;
    }

    pub fn fail_reads(&mut self, failing: bool) {
        self.failing_reads = failing;
    }

    /// Fail the next `count` truncations with [`StorageFault::Write`].
    pub fn fail_truncates(&mut self, count: u32) {
        self.failing_truncates = count;
    }

    /// The next append persists only its first `keep` bytes and then fails,
    /// like a card that errors out partway through a write.
    pub fn tear_next_append(&mut self, keep: usize) {
        self.tear_at = Some(keep);
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

impl Storage for RamStorage {
    fn append(&mut self, bytes: &[u8]) -> Result<(), StorageFault> {
        if self.failing_appends > 0 {
            self.failing_appends -= 1;
            return Err(StorageFault::Write);
        }
        if let Some(keep) = self.tear_at.take() {
            self.data.extend_from_slice(&bytes[..keep.min(bytes.len())]);
            return Err(StorageFault::Write);
        }
        if self.limit.is_some_and(|limit| self.data.len() + bytes.len() > limit) {
            return Err(StorageFault::Full);
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, StorageFault> {
        if self.failing_reads {
            return Err(StorageFault::Read);
        }
        let Some(available) = self.data.get(offset as usize..) else {
            return Ok(0);
        };
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn truncate(&mut self, len: u64) -> Result<(), StorageFault> {
        if self.failing_truncates > 0 {
            self.failing_truncates -= 1;
            return Err(StorageFault::Write);
        }
        self.data.truncate(len as usize);
        Ok(())
    }

    fn discard_before(&mut self, offset: u64) -> Result<(), StorageFault> {
        let offset = (offset as usize).min(self.data.len());
        self.data.drain(..offset);
        Ok(())
    }
}
