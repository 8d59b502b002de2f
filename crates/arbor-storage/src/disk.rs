//! Positional file I/O for fixed-size node records.

use arbor_common::{ArborError, NodeId, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// The store's long-lived handle on a node file.
///
/// All access is positional (`pread`/`pwrite` style), so the handle carries
/// no cursor and can be shared freely between threads.
#[derive(Debug)]
pub struct NodeFile {
    /// The file handle.
    file: File,
    /// Path to the file.
    path: PathBuf,
    /// Size of one record in bytes.
    record_size: usize,
    /// Enable fsync after writes.
    fsync_enabled: bool,
}

impl NodeFile {
    /// Opens or creates a node file.
    pub fn open(path: &Path, record_size: usize, fsync_enabled: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            record_size,
            fsync_enabled,
        })
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the underlying handle.
    pub fn file(&self) -> &File {
        &self.file
    }

    /// Returns the record size this file was opened with.
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Current file length in bytes.
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Number of whole records in the file, recomputed from the file size.
    pub fn record_count(&self) -> Result<u32> {
        let count = self.len()? / self.record_size as u64;
        u32::try_from(count).map_err(|_| {
            ArborError::Internal(format!("record count {} exceeds id space", count))
        })
    }

    /// Byte offset of a record slot.
    pub fn offset(&self, id: NodeId) -> u64 {
        id.index() * self.record_size as u64
    }

    /// Reads the full record of `id`.
    ///
    /// A short read means the slot does not exist.
    pub fn read_record(&self, id: NodeId) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; self.record_size];
        match read_exact_at(&self.file, &mut buffer, self.offset(id)) {
            Ok(()) => Ok(buffer),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(ArborError::NodeNotFound { id: id.0 })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Writes `data` at `offset`, syncing if configured.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        write_all_at(&self.file, data, offset)?;

        if self.fsync_enabled {
            self.file.sync_data()?;
        }

        Ok(())
    }

    /// Writes a new record at `offset`, the current end of the file.
    ///
    /// If the write or its sync fails, the file is cut back to `offset` so
    /// the slot never counts as a node.
    pub fn append_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.write_at(offset, data)
            .map_err(|e| self.roll_back(offset, e))
    }

    fn roll_back(&self, offset: u64, cause: ArborError) -> ArborError {
        if let Err(e) = self.file.set_len(offset) {
            warn!(
                path = %self.path.display(),
                offset,
                error = %e,
                "failed to roll back append"
            );
        }
        cause
    }

    /// Flushes all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ));
            }
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ));
            }
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
