//! Reading history and its persisted log
//!
//! # Layout
//!
//! - [`HistoryBuffer`]: fixed-capacity ring holding the most recent `N`
//!   readings in RAM, served verbatim by `/api/history`.
//! - Pending queue inside [`HistoryStore`]: readings not yet flushed.
//! - Persisted log on a [`Storage`] backend: append-only flush frames
//!
//! ```text
//! [0xA5][payload_len: u16 LE][postcard(Vec<Reading>) + CRC-32]
//! ```
//!
//! A frame is only ever written whole by one `append` call. On boot the log is
//! scanned, the ring is rebuilt from its last `N` readings and a torn tail left
//! by a power cut is truncated away.

mod export;
mod frame;
mod history;
mod ram;
mod reading;
mod ring;
mod stats;

pub use export::{ExportFormat, ExportProgress, ExportStream};
pub use frame::{FRAME_HEADER_LEN, FRAME_MAGIC, encode_frame};
pub use history::{HistoryStore, ReloadSummary, StoreStats};
pub use ram::RamStorage;
pub use reading::{CSV_HEADER, Centi, Reading, ReadingJson};
pub use ring::HistoryBuffer;
pub use stats::{QuantityStats, TrendStats, WindowStats};

pub use crate::error::StorageFault;

/// Most readings a single flush frame may carry.
pub const MAX_FRAME_READINGS: usize = 64;

/// Upper bound on an encoded frame payload, CRC included.
pub const MAX_FRAME_PAYLOAD: usize = 2048;

/// Byte-addressed durable storage holding the persisted log.
///
/// `append` must be atomic with respect to the caller: when it returns `Ok`
/// the bytes are committed. A backend that fails partway through should cut
/// what it wrote; if it cannot, `len` must still count those bytes so the
/// history store can truncate them. A power cut during `append` may leave a
/// partial tail, which the log scanner detects and drops at the next boot.
pub trait Storage {
    fn append(&mut self, bytes: &[u8]) -> Result<(), StorageFault>;

    /// Read up to `buf.len()` bytes at `offset`, returning how many were read.
    /// Returns 0 at or past the end.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, StorageFault>;

    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cut the log back to `len` bytes.
    fn truncate(&mut self, len: u64) -> Result<(), StorageFault>;

    /// Drop everything before `offset`; the byte at `offset` becomes offset 0.
    fn discard_before(&mut self, offset: u64) -> Result<(), StorageFault>;
}
