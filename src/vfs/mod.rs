//! Read-only SQLite VFS over seekable-zstd sources.
//!
//! The VFS registers under the name [`VFS_NAME`] and serves any database
//! opened with `?vfs=zstd`. Names starting with `http://` or `https://`
//! are read through [`HttpRangeSource`]; everything else is treated as a
//! local filesystem path.

mod ffi;

pub use ffi::{register, register_with};

use std::path::Path;
use std::sync::Arc;

use libsqlite3_sys::{SQLITE_IOCAP_IMMUTABLE, SQLITE_IOCAP_SAFE_APPEND};

use crate::config::VfsOptions;
use crate::error::{Error, Result};
use crate::io::{HttpRangeSource, LocalSource, RandomSource};
use crate::seekable::{CancelHandle, SeekableZstdReader};

/// Name the VFS registers under.
pub const VFS_NAME: &str = "zstd";

/// Side files the engine must never find or open: the input is immutable,
/// so write-ahead logs, rollback journals, and shared-memory files cannot
/// exist for it.
const SIDE_FILE_SUFFIXES: [&str; 3] = ["-wal", "-journal", "-shm"];

const SECTOR_SIZE: i32 = 4096;

/// The VFS itself: stateless apart from its options.
pub struct ZstdVfs {
    options: VfsOptions,
}

impl ZstdVfs {
    pub fn new(options: VfsOptions) -> Self {
        Self { options }
    }

    /// Access probe. Side-file names report as absent so the engine never
    /// tries to use journals or WAL against the read-only database.
    pub fn access(&self, name: &str) -> bool {
        !SIDE_FILE_SUFFIXES
            .iter()
            .any(|suffix| name.ends_with(suffix))
    }

    /// Names pass through verbatim; URIs and relative paths included.
    pub fn full_pathname<'a>(&self, name: &'a str) -> &'a str {
        name
    }

    pub fn delete(&self, _name: &str) -> Result<()> {
        Err(Error::ReadOnly)
    }

    /// Open `name` as a read-only compressed database.
    ///
    /// Builds the source by scheme, then the seekable reader over it.
    /// Side-file names fail straight away with [`Error::CantOpen`].
    pub fn open(&self, name: &str) -> Result<ZstdFile> {
        if !self.access(name) {
            return Err(Error::CantOpen(name.to_string()));
        }

        let source: Arc<dyn RandomSource> =
            if name.starts_with("http://") || name.starts_with("https://") {
                Arc::new(HttpRangeSource::new(name, &self.options)?)
            } else {
                Arc::new(LocalSource::open(Path::new(name))?)
            };

        let reader = SeekableZstdReader::open(source, self.options.frame_cache_max_frames)?;
        Ok(ZstdFile { reader })
    }
}

/// One open read-only database handle.
///
/// Owns its reader, which owns the source; both are released on drop.
/// Handles opened against the same name are fully independent.
#[derive(Debug)]
pub struct ZstdFile {
    reader: SeekableZstdReader,
}

impl ZstdFile {
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.reader.read_at(offset, buf)
    }

    /// Logical (decompressed) size of the database.
    pub fn file_size(&self) -> u64 {
        self.reader.logical_size()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.reader.cancel_handle()
    }

    pub fn write(&self, _offset: u64, _buf: &[u8]) -> Result<()> {
        Err(Error::ReadOnly)
    }

    pub fn truncate(&self, _size: u64) -> Result<()> {
        Err(Error::ReadOnly)
    }

    /// Nothing to flush; succeeds so the engine's pragma paths stay happy.
    pub fn sync(&self) -> Result<()> {
        Ok(())
    }

    /// Locking is a no-op: the input is immutable and reads need no
    /// coordination.
    pub fn lock(&self) -> Result<()> {
        Ok(())
    }

    pub fn unlock(&self) -> Result<()> {
        Ok(())
    }

    /// No writer can exist, so a reserved lock never does either.
    pub fn check_reserved_lock(&self) -> bool {
        false
    }

    pub fn sector_size(&self) -> i32 {
        SECTOR_SIZE
    }

    /// The engine skips write-related bookkeeping for immutable files.
    pub fn device_characteristics(&self) -> i32 {
        SQLITE_IOCAP_IMMUTABLE | SQLITE_IOCAP_SAFE_APPEND
    }
}
