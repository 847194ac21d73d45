//! Flush frame codec and log scanning

use alloc::vec;
use alloc::vec::Vec;
use core::ops::ControlFlow;

use crc::{CRC_32_ISCSI, Crc};

use super::{MAX_FRAME_PAYLOAD, MAX_FRAME_READINGS, Reading, Storage, StorageFault};

/// First byte of every frame.
pub const FRAME_MAGIC: u8 = 0xA5;

/// Magic byte plus little-endian `u16` payload length.
pub const FRAME_HEADER_LEN: usize = 3;

static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Encode `readings` as one complete frame ready to append.
pub fn encode_frame(readings: &[Reading]) -> Result<Vec<u8>, StorageFault> {
    if readings.is_empty() || readings.len() > MAX_FRAME_READINGS {
        return Err(StorageFault::Write);
    }

    let mut buf = vec![0u8; FRAME_HEADER_LEN + MAX_FRAME_PAYLOAD];
    let used = postcard::to_slice_crc32(&readings, &mut buf[FRAME_HEADER_LEN..], CRC32.digest())
        .map_err(|_| StorageFault::Write)?
        .len();

    buf[0] = FRAME_MAGIC;
    buf[1..FRAME_HEADER_LEN].copy_from_slice(&(used as u16).to_le_bytes());
    buf.truncate(FRAME_HEADER_LEN + used);
    Ok(buf)
}

/// Outcome of reading the frame at one offset.
#[derive(Debug, PartialEq)]
pub(crate) enum FrameRead {
    Frame { readings: Vec<Reading>, next: u64 },
    /// Offset is exactly at the end of the region.
    End,
    /// Bytes exist but do not form a valid frame.
    Torn,
}

/// Read and verify the frame starting at `offset`, not looking past `end`.
pub(crate) fn read_frame<S: Storage>(storage: &S, offset: u64, end: u64) -> Result<FrameRead, StorageFault> {
    if offset >= end {
        return Ok(FrameRead::End);
    }
    if end - offset < FRAME_HEADER_LEN as u64 {
        return Ok(FrameRead::Torn);
    }

    let mut header = [0u8; FRAME_HEADER_LEN];
    if !read_exact(storage, offset, &mut header)? || header[0] != FRAME_MAGIC {
        return Ok(FrameRead::Torn);
    }
    let payload_len = u16::from_le_bytes([header[1], header[2]]) as usize;
    let next = offset + (FRAME_HEADER_LEN + payload_len) as u64;
    if payload_len == 0 || payload_len > MAX_FRAME_PAYLOAD || next > end {
        return Ok(FrameRead::Torn);
    }

    let mut payload = vec![0u8; payload_len];
    if !read_exact(storage, offset + FRAME_HEADER_LEN as u64, &mut payload)? {
        return Ok(FrameRead::Torn);
    }
    match postcard::from_bytes_crc32::<Vec<Reading>>(&payload, CRC32.digest()) {
        Ok(readings) if !readings.is_empty() => Ok(FrameRead::Frame { readings, next }),
        _ => Ok(FrameRead::Torn),
    }
}

/// Where a scan over the log stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScanEnd {
    /// End of the last verified frame visited.
    pub valid_end: u64,
    /// A frame failed verification before `end`.
    pub torn: bool,
}

/// Visit every valid frame in `[0, end)` in order. The visitor receives the
/// frame's start offset and readings and may stop the scan early.
pub(crate) fn for_each_frame<S, F>(storage: &S, end: u64, mut visit: F) -> Result<ScanEnd, StorageFault>
where
    S: Storage,
    F: FnMut(u64, Vec<Reading>) -> ControlFlow<()>,
{
    let mut offset = 0;
    loop {
        match read_frame(storage, offset, end)? {
            FrameRead::Frame { readings, next } => {
                let start = offset;
                offset = next;
                if visit(start, readings).is_break() {
                    return Ok(ScanEnd {
                        valid_end: offset,
                        torn: false,
                    });
                }
            }
            FrameRead::End => {
                return Ok(ScanEnd {
                    valid_end: offset,
                    torn: false,
                });
            }
            FrameRead::Torn => {
                return Ok(ScanEnd {
                    valid_end: offset,
                    torn: true,
                });
            }
        }
    }
}

/// Fill `buf` from `offset`; `Ok(false)` when the storage ends first.
fn read_exact<S: Storage>(storage: &S, offset: u64, buf: &mut [u8]) -> Result<bool, StorageFault> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = storage.read_at(offset + filled as u64, &mut buf[filled..])?;
        if n == 0 {
            return Ok(false);
        }
        filled += n;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SensorFault;
    use crate::storage::{Centi, RamStorage};

    fn sample_frame() -> Vec<Reading> {
        vec![
            Reading::new(100, 450, Centi(2150), Centi(4000)),
            Reading::invalid(200, SensorFault::Bus),
            Reading::new(300, 460, Centi(-250), Centi(4100)),
        ]
    }

    #[test]
    fn test_frame_header() {
        let frame = encode_frame(&sample_frame()).unwrap();
        assert_eq!(frame[0], FRAME_MAGIC);
        let len = u16::from_le_bytes([frame[1], frame[2]]) as usize;
        assert_eq!(len, frame.len() - FRAME_HEADER_LEN, "length covers payload and CRC");
    }

    #[test]
    fn test_full_frame_fits_payload_bound() {
        let worst = Reading {
            timestamp: u32::MAX,
            co2_ppm: u16::MAX,
            temperature: Centi(i32::MIN),
            humidity: Centi(i32::MAX),
            fault: Some(SensorFault::OutOfRange),
        };
        let readings = vec![worst; MAX_FRAME_READINGS];
        assert!(encode_frame(&readings).is_ok(), "largest frame must encode");
        assert_eq!(encode_frame(&[]), Err(StorageFault::Write));
    }

    #[test]
    fn test_read_back_frames() {
        let mut storage = RamStorage::new();
        storage.append(&encode_frame(&sample_frame()).unwrap()).unwrap();
        storage.append(&encode_frame(&sample_frame()[..1]).unwrap()).unwrap();

        let mut seen = Vec::new();
        let end = for_each_frame(&storage, storage.len(), |offset, readings| {
            seen.push((offset, readings.len()));
            ControlFlow::Continue(())
        })
        .unwrap();

        assert_eq!(end, ScanEnd { valid_end: storage.len(), torn: false });
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (0, 3));
        assert_eq!(seen[1].1, 1);
    }

    #[test]
    fn test_corrupted_byte_is_torn() {
        let mut storage = RamStorage::new();
        let mut frame = encode_frame(&sample_frame()).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        storage.append(&frame).unwrap();

        assert_eq!(read_frame(&storage, 0, storage.len()).unwrap(), FrameRead::Torn);
    }

    #[test]
    fn test_short_tail_is_torn() {
        let mut storage = RamStorage::new();
        let frame = encode_frame(&sample_frame()).unwrap();
        storage.append(&frame).unwrap();
        storage.append(&frame[..frame.len() / 2]).unwrap();

        let end = for_each_frame(&storage, storage.len(), |_, _| ControlFlow::Continue(())).unwrap();
        assert!(end.torn);
        assert_eq!(end.valid_end, frame.len() as u64, "scan stops after the intact frame");
    }
}
