use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use super::RandomSource;

/// Sequential `Read + Seek` cursor over a shared [`RandomSource`].
///
/// A `RandomSource` is safe for concurrent positional reads but carries no
/// offset of its own. Stream-oriented consumers (the seek-table parser, the
/// zstd decoder) each get their own cursor; any number of cursors over the
/// same source can read and seek independently.
///
/// A single `SourceCursor` is not safe for concurrent use.
pub struct SourceCursor {
    source: Arc<dyn RandomSource>,
    offset: u64,
}

impl SourceCursor {
    pub fn new(source: Arc<dyn RandomSource>) -> Self {
        Self { source, offset: 0 }
    }

    pub fn with_offset(source: Arc<dyn RandomSource>, offset: u64) -> Self {
        Self { source, offset }
    }

    pub fn position(&self) -> u64 {
        self.offset
    }
}

impl Read for SourceCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let size = self.source.size();
        if self.offset >= size {
            return Ok(0);
        }
        let len = (buf.len() as u64).min(size - self.offset) as usize;
        if len == 0 {
            return Ok(0);
        }
        let n = self.source.read_at(self.offset, &mut buf[..len])?;
        self.offset += n as u64;
        Ok(n)
    }
}

impl Seek for SourceCursor {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let next = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.offset.checked_add_signed(delta),
            SeekFrom::End(delta) => self.source.size().checked_add_signed(delta),
        };
        match next {
            // Seeking past the end is allowed; subsequent reads return 0.
            Some(offset) => {
                self.offset = offset;
                Ok(offset)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative position",
            )),
        }
    }
}
