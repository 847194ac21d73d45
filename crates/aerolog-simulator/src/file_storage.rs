//! File-backed persisted log

use std::cell::RefCell;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use aerolog_core::storage::{Storage, StorageFault};
use log::{debug, warn};

/// Append-only log file. Every append is synced before it is reported as
/// committed, so a killed simulator behaves like a power cut on the device.
pub struct FileStorage {
    path: PathBuf,
    // Reads take `&self`; seeking needs the handle mutably.
    file: RefCell<File>,
    len: u64,
}

impl FileStorage {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = open_log(&path)?;
        let len = file.metadata()?.len();
        debug!("Opened {} ({} bytes)", path.display(), len);
        Ok(Self {
            path,
            file: RefCell::new(file),
            len,
        })
    }

    /// Copy `[offset, len)` to a side file and swap it in.
    fn rewrite_from(&mut self, offset: u64) -> io::Result<()> {
        let mut tail = Vec::with_capacity((self.len - offset) as usize);
        {
            let mut file = self.file.borrow_mut();
            file.seek(SeekFrom::Start(offset))?;
            file.read_to_end(&mut tail)?;
        }

        let side = self.path.with_extension("tmp");
        let mut out = File::create(&side)?;
        out.write_all(&tail)?;
        out.sync_all()?;
        drop(out);
        fs::rename(&side, &self.path)?;

        self.file = RefCell::new(open_log(&self.path)?);
        self.len = tail.len() as u64;
        Ok(())
    }
}

fn open_log(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).append(true).create(true).open(path)
}

/// The parts of a log file handle an append needs.
trait LogFile: Write {
    fn set_len(&mut self, len: u64) -> io::Result<()>;
    fn sync_data(&mut self) -> io::Result<()>;
}

impl LogFile for File {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }

    fn sync_data(&mut self) -> io::Result<()> {
        File::sync_data(self)
    }
}

/// Write and sync `bytes` after the `committed` prefix. On failure the file
/// is cut back to `committed`, so a half-written frame never stays in front
/// of the next append.
fn append_synced<F: LogFile>(file: &mut F, committed: u64, bytes: &[u8]) -> Result<(), StorageFault> {
    let result = file.write_all(bytes).and_then(|()| file.sync_data());
    if let Err(err) = result {
        let fault = write_fault(err);
        if let Err(rollback) = file.set_len(committed).and_then(|()| file.sync_data()) {
            warn!("Rolling the log back to {} bytes failed: {}", committed, rollback);
        }
        return Err(fault);
    }
    Ok(())
}

fn write_fault(err: io::Error) -> StorageFault {
    warn!("Log write error: {}", err);
    match err.kind() {
        io::ErrorKind::StorageFull => StorageFault::Full,
        _ => StorageFault::Write,
    }
}

impl Storage for FileStorage {
    fn append(&mut self, bytes: &[u8]) -> Result<(), StorageFault> {
        append_synced(self.file.get_mut(), self.len, bytes)?;
        self.len += bytes.len() as u64;
        Ok(())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, StorageFault> {
        if offset >= self.len {
            return Ok(0);
        }
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(offset)).map_err(|_| StorageFault::Read)?;
        file.read(buf).map_err(|_| StorageFault::Read)
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn truncate(&mut self, len: u64) -> Result<(), StorageFault> {
        let file = self.file.get_mut();
        file.set_len(len).map_err(write_fault)?;
        file.sync_all().map_err(write_fault)?;
        self.len = len;
        Ok(())
    }

    fn discard_before(&mut self, offset: u64) -> Result<(), StorageFault> {
        if offset == 0 {
            return Ok(());
        }
        self.rewrite_from(offset.min(self.len)).map_err(write_fault)
    }
}

/// Durable file log, or RAM when the file cannot be opened.
pub enum HostStorage {
    File(FileStorage),
    Ram(aerolog_core::storage::RamStorage),
}

impl Storage for HostStorage {
    fn append(&mut self, bytes: &[u8]) -> Result<(), StorageFault> {
        match self {
            Self::File(s) => s.append(bytes),
            Self::Ram(s) => s.append(bytes),
        }
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, StorageFault> {
        match self {
            Self::File(s) => s.read_at(offset, buf),
            Self::Ram(s) => s.read_at(offset, buf),
        }
    }

    fn len(&self) -> u64 {
        match self {
            Self::File(s) => s.len(),
            Self::Ram(s) => s.len(),
        }
    }

    fn truncate(&mut self, len: u64) -> Result<(), StorageFault> {
        match self {
            Self::File(s) => s.truncate(len),
            Self::Ram(s) => s.truncate(len),
        }
    }

    fn discard_before(&mut self, offset: u64) -> Result<(), StorageFault> {
        match self {
            Self::File(s) => s.discard_before(offset),
            Self::Ram(s) => s.discard_before(offset),
        }
    }
}
