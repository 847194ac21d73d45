//! Lazy export of the persisted log
//!
//! An [`ExportStream`] walks the log one frame at a time and renders at most a
//! caller-chosen number of bytes per call, so a session can stream the whole
//! log with a single frame in memory.

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;

use super::frame::{FrameRead, read_frame};
use super::{CSV_HEADER, HistoryStore, Reading, ReadingJson, Storage, StorageFault};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Csv => "text/csv",
            Self::Json => "application/json",
        }
    }

    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Csv => "aerolog.csv",
            Self::Json => "aerolog.json",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportProgress {
    More,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Prologue,
    Records,
    Epilogue,
    Done,
}

/// Cursor over the log bytes that existed when the export began.
#[derive(Debug)]
pub struct ExportStream {
    format: ExportFormat,
    offset: u64,
    end: u64,
    generation: u32,
    queued: VecDeque<Reading>,
    stage: Stage,
    records: u32,
}

impl ExportStream {
    pub(crate) fn new(format: ExportFormat, end: u64, generation: u32) -> Self {
        Self {
            format,
            offset: 0,
            end,
            generation,
            queued: VecDeque::new(),
            stage: Stage::Prologue,
            records: 0,
        }
    }

    pub fn format(&self) -> ExportFormat {
        self.format
    }

    pub fn records(&self) -> u32 {
        self.records
    }

    /// Render into `out` until it holds at least `budget` bytes or the export
    /// is complete.
    ///
    /// Fails with [`StorageFault::Stale`] if the log was trimmed or truncated
    /// since the export began.
    pub fn fill<S: Storage>(
        &mut self,
        store: &HistoryStore<S>,
        out: &mut Vec<u8>,
        budget: usize,
    ) -> Result<ExportProgress, StorageFault> {
        if store.generation() != self.generation {
            return Err(StorageFault::Stale);
        }

        let mut line = String::new();
        while out.len() < budget {
            match self.stage {
                Stage::Prologue => {
                    match self.format {
                        ExportFormat::Csv => {
                            out.extend_from_slice(CSV_HEADER.as_bytes());
                            out.push(b'\n');
                        }
                        ExportFormat::Json => out.push(b'['),
                    }
                    self.stage = Stage::Records;
                }
                Stage::Records => {
                    if let Some(reading) = self.queued.pop_front() {
                        line.clear();
                        self.render(&reading, &mut line)?;
                        out.extend_from_slice(line.as_bytes());
                        self.records += 1;
                        continue;
                    }
                    match read_frame(store.storage(), self.offset, self.end)? {
                        FrameRead::Frame { readings, next } => {
                            self.queued.extend(readings);
                            self.offset = next;
                        }
                        // A torn region only exists before reload; export what is intact.
                        FrameRead::End | FrameRead::Torn => self.stage = Stage::Epilogue,
                    }
                }
                Stage::Epilogue => {
                    if self.format == ExportFormat::Json {
                        out.extend_from_slice(b"]\n");
                    }
                    self.stage = Stage::Done;
                }
                Stage::Done => return Ok(ExportProgress::Done),
            }
        }

        if self.stage == Stage::Done {
            Ok(ExportProgress::Done)
        } else {
            Ok(ExportProgress::More)
        }
    }

    fn render(&self, reading: &Reading, line: &mut String) -> Result<(), StorageFault> {
        match self.format {
            ExportFormat::Csv => reading.write_csv_row(line).map_err(|_| StorageFault::Read),
            ExportFormat::Json => {
                if self.records > 0 {
                    line.push(',');
                }
                let json = serde_json::to_string(&ReadingJson::from(reading)).map_err(|_| StorageFault::Read)?;
                line.push_str(&json);
                Ok(())
            }
        }
    }
}
