//! Random-access reads over a seekable-zstd stream.
//!
//! The reader parses the seek table once at open time and answers
//! `(offset, len)` requests against the decompressed stream by decoding
//! only the frames that cover the requested bytes.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use byteorder::{LittleEndian, ReadBytesExt};
use log::debug;
use xxhash_rust::xxh64::xxh64;

use super::seek_table::{FrameEntry, FrameIndex, ZSTD_FRAME_MAGIC};
use crate::error::{Error, Result};
use crate::io::{RandomSource, SourceCursor};

/// Signal for interrupting in-flight reads on a reader.
///
/// Cancellation is observed between frame fetches: a read returns
/// [`Error::Cancelled`] at the next frame boundary and surfaces no
/// partial data.
#[derive(Clone, Default, Debug)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Random-access reader over a seekable-zstd stream.
///
/// The frame index and the source are immutable after construction, so
/// concurrent `read_at` calls on one reader are safe; only the frame
/// cache takes a lock. Each frame decode runs an ephemeral decoder over
/// its own [`SourceCursor`].
pub struct SeekableZstdReader {
    source: Arc<dyn RandomSource>,
    index: FrameIndex,
    cache: Mutex<FrameCache>,
    cancel: CancelHandle,
}

impl std::fmt::Debug for SeekableZstdReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeekableZstdReader")
            .field("index", &self.index)
            .field("cancel", &self.cancel)
            .finish()
    }
}

impl SeekableZstdReader {
    /// Parse the seek table of `source` and build a reader over it.
    ///
    /// `max_cached_frames` bounds the LRU cache of decompressed frames;
    /// zero disables caching.
    pub fn open(source: Arc<dyn RandomSource>, max_cached_frames: usize) -> Result<Self> {
        let mut table = BufReader::new(SourceCursor::new(Arc::clone(&source)));
        let index = FrameIndex::parse(&mut table)?;
        debug!(
            "seekable stream opened: {} frames, {} logical bytes in {} physical",
            index.frame_count(),
            index.logical_size(),
            index.physical_size()
        );

        Ok(Self {
            source,
            index,
            cache: Mutex::new(FrameCache::new(max_cached_frames)),
            cancel: CancelHandle::default(),
        })
    }

    /// Size of the decompressed stream. Stable for the reader's lifetime.
    pub fn logical_size(&self) -> u64 {
        self.index.logical_size()
    }

    pub fn frame_count(&self) -> usize {
        self.index.frame_count()
    }

    /// Get a handle that cancels in-flight and future reads.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Read decompressed bytes starting at `offset` into `buf`.
    ///
    /// Returns the number of bytes copied: `buf.len()` unless the request
    /// runs past the logical end, in which case the read is short. A read
    /// at or past the logical end returns `Ok(0)`.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut frame = match self.index.find(offset) {
            Some(frame) => frame,
            None => return Ok(0),
        };

        let mut copied = 0usize;
        while copied < buf.len() && frame < self.index.frame_count() {
            let entry = self.index.entry(frame);
            if entry.logical_len == 0 {
                frame += 1;
                continue;
            }

            let data = self.frame_data(&entry)?;
            let skip = (offset + copied as u64 - entry.logical_offset) as usize;
            let n = (data.len() - skip).min(buf.len() - copied);
            buf[copied..copied + n].copy_from_slice(&data[skip..skip + n]);
            copied += n;
            frame += 1;
        }
        Ok(copied)
    }

    /// Get one frame's decompressed bytes, from the cache when possible.
    fn frame_data(&self, entry: &FrameEntry) -> Result<Arc<Vec<u8>>> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if let Some(data) = self.cache.lock()?.get(entry.index) {
            return Ok(data);
        }

        let data = Arc::new(self.decode_frame(entry)?);
        self.cache.lock()?.insert(entry.index, Arc::clone(&data));
        Ok(data)
    }

    /// Fetch and decompress one frame through its own cursor.
    fn decode_frame(&self, entry: &FrameEntry) -> Result<Vec<u8>> {
        let frame_end = entry.compressed_offset + entry.compressed_len as u64;
        if frame_end > self.source.size() {
            return Err(Error::IoShort {
                wanted: entry.compressed_len as usize,
                got: self
                    .source
                    .size()
                    .saturating_sub(entry.compressed_offset) as usize,
            });
        }

        let mut cursor = SourceCursor::with_offset(Arc::clone(&self.source), entry.compressed_offset);
        let magic = cursor.read_u32::<LittleEndian>().map_err(Error::from)?;
        if magic != ZSTD_FRAME_MAGIC {
            return Err(Error::Corrupt(format!(
                "frame {}: bad zstd frame magic {magic:#010x}",
                entry.index
            )));
        }
        cursor
            .seek(SeekFrom::Start(entry.compressed_offset))
            .map_err(Error::from)?;

        let mut decoder = zstd::stream::read::Decoder::new(cursor.take(entry.compressed_len as u64))
            .map_err(|e| Error::Corrupt(format!("frame {}: {e}", entry.index)))?
            .single_frame();

        let mut data = Vec::with_capacity(entry.logical_len as usize);
        decoder.read_to_end(&mut data).map_err(|e| {
            // Source-side failures pass through; everything else means the
            // frame bytes themselves did not decode.
            match e.get_ref().and_then(|inner| inner.downcast_ref::<Error>()) {
                Some(inner) => inner.clone(),
                None => Error::Corrupt(format!("frame {}: {e}", entry.index)),
            }
        })?;

        if data.len() != entry.logical_len as usize {
            return Err(Error::Corrupt(format!(
                "frame {}: decompressed to {} bytes, seek table says {}",
                entry.index,
                data.len(),
                entry.logical_len
            )));
        }
        if let Some(expected) = entry.checksum {
            let actual = xxh64(&data, 0) as u32;
            if actual != expected {
                return Err(Error::Corrupt(format!(
                    "frame {}: checksum mismatch ({actual:#010x} != {expected:#010x})",
                    entry.index
                )));
            }
        }
        Ok(data)
    }
}

/// Bounded cache of decompressed frames keyed by frame index, evicting
/// least-recently-used first. Payloads are shared so eviction never
/// invalidates a read in progress.
struct FrameCache {
    capacity: usize,
    frames: HashMap<usize, Arc<Vec<u8>>>,
    order: VecDeque<usize>,
}

impl FrameCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            frames: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&mut self, frame: usize) -> Option<Arc<Vec<u8>>> {
        let data = self.frames.get(&frame).cloned()?;
        if let Some(at) = self.order.iter().position(|&f| f == frame) {
            self.order.remove(at);
            self.order.push_back(frame);
        }
        Some(data)
    }

    fn insert(&mut self, frame: usize, data: Arc<Vec<u8>>) {
        if self.capacity == 0 || self.frames.contains_key(&frame) {
            return;
        }
        while self.frames.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.frames.remove(&oldest);
                }
                None => break,
            }
        }
        self.frames.insert(frame, data);
        self.order.push_back(frame);
    }
}
