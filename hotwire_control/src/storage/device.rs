//! Storage device contract and the filesystem-backed implementation.
//!
//! Reads go through the device (`&mut D`), which is only reachable through
//! a [`StorageGate`](super::StorageGate) guard, so every byte moved is moved
//! under the gate. An open file handle is plain data and may be kept across
//! ticks without holding the gate.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::StorageError;

/// Metadata of an open file.
pub trait StorageFile: Send {
    /// Byte offset of the next read.
    fn position(&self) -> u64;

    /// Total file size in bytes.
    fn size(&self) -> u64;
}

/// Line-oriented storage device.
pub trait StorageDevice: Send {
    type File: StorageFile;

    /// Open `path` (relative to the device root) for reading.
    fn open_for_read(&mut self, path: &str) -> Result<Self::File, StorageError>;

    /// Append the next line (terminator included) to `buf`, consuming at
    /// most `limit` bytes. Bytes that are not UTF-8 are replaced.
    ///
    /// Returns the number of bytes consumed; `0` means end of file. A
    /// return of `limit` without a trailing `\n` in `buf` means the line
    /// was cut short.
    fn read_line(
        &mut self,
        file: &mut Self::File,
        buf: &mut String,
        limit: usize,
    ) -> Result<usize, StorageError>;

    /// Release the handle.
    fn close(&mut self, file: Self::File) {
        drop(file);
    }

    /// Read a whole (small) file, e.g. the configuration.
    fn read_to_string(&mut self, path: &str) -> Result<String, StorageError>;
}

// ─── Filesystem device ──────────────────────────────────────────────

/// Storage device rooted at a host directory.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

/// Open file on an [`FsStorage`].
#[derive(Debug)]
pub struct FsFile {
    reader: BufReader<File>,
    raw: Vec<u8>,
    position: u64,
    size: u64,
}

impl StorageFile for FsFile {
    fn position(&self) -> u64 {
        self.position
    }

    fn size(&self) -> u64 {
        self.size
    }
}

fn map_open_error(e: std::io::Error, path: &Path) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(path.display().to_string())
    } else {
        StorageError::Io(format!("{}: {e}", path.display()))
    }
}

impl StorageDevice for FsStorage {
    type File = FsFile;

    fn open_for_read(&mut self, path: &str) -> Result<FsFile, StorageError> {
        let full = self.resolve(path);
        let file = File::open(&full).map_err(|e| map_open_error(e, &full))?;
        let size = file.metadata()?.len();
        debug!(path = %full.display(), size, "opened file");
        Ok(FsFile {
            reader: BufReader::new(file),
            raw: Vec::with_capacity(128),
            position: 0,
            size,
        })
    }

    fn read_line(
        &mut self,
        file: &mut FsFile,
        buf: &mut String,
        limit: usize,
    ) -> Result<usize, StorageError> {
        file.raw.clear();
        let n = (&mut file.reader)
            .take(limit as u64)
            .read_until(b'\n', &mut file.raw)?;
        file.position += n as u64;
        buf.push_str(&String::from_utf8_lossy(&file.raw));
        Ok(n)
    }

    fn read_to_string(&mut self, path: &str) -> Result<String, StorageError> {
        let full = self.resolve(path);
        std::fs::read_to_string(&full).map_err(|e| map_open_error(e, &full))
    }
}
