use std::fs::File;
use std::path::Path;

use super::RandomSource;
use crate::error::Result;

/// Local file source with random access support.
///
/// The file is assumed immutable for the lifetime of the source; the size
/// is captured once at open time and the descriptor is retained until the
/// source is dropped. No locking is performed.
#[derive(Debug)]
pub struct LocalSource {
    file: File,
    size: u64,
}

impl LocalSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self { file, size })
    }
}

impl RandomSource for LocalSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            Ok(self.file.read_at(buf, offset)?)
        }

        #[cfg(windows)]
        {
            use std::os::windows::fs::FileExt;
            if offset >= self.size {
                return Ok(0);
            }
            Ok(self.file.seek_read(buf, offset)?)
        }

        #[cfg(not(any(unix, windows)))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let mut file = &self.file;
            file.seek(SeekFrom::Start(offset))?;
            Ok(file.read(buf)?)
        }
    }

    fn size(&self) -> u64 {
        self.size
    }
}
