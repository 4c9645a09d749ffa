//! Seek-table parsing for the Zstandard seekable format.
//!
//! A seekable stream is a series of standard zstd frames followed by one
//! skippable frame holding the seek table. Like a ZIP central directory,
//! the table is found from the end of the file: the last 9 bytes are an
//! integrity footer naming the entry count, a descriptor byte, and the
//! seekable magic number.

use std::io::{Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{Error, Result};

/// Magic number of the skippable frame carrying the seek table.
pub const SKIPPABLE_FRAME_MAGIC: u32 = 0x184D2A5E;

/// Magic number closing the seek-table footer.
pub const SEEK_TABLE_FOOTER_MAGIC: u32 = 0x8F92EAB1;

/// Magic number opening every standard zstd data frame.
pub(crate) const ZSTD_FRAME_MAGIC: u32 = 0xFD2FB528;

/// Size of the trailing footer: frame count (4) + descriptor (1) + magic (4).
const FOOTER_SIZE: u64 = 9;

/// Size of the skippable frame header: magic (4) + frame size (4).
const SKIPPABLE_HEADER_SIZE: u64 = 8;

/// Bit 7 of the descriptor: per-frame checksums present.
const DESCRIPTOR_CHECKSUM_FLAG: u8 = 0b1000_0000;

/// Bits 6..2 of the descriptor are reserved and must be zero.
const DESCRIPTOR_RESERVED_MASK: u8 = 0b0111_1100;

/// One frame's worth of index data.
#[derive(Debug, Clone, Copy)]
pub struct FrameEntry {
    pub index: usize,
    pub compressed_offset: u64,
    pub compressed_len: u32,
    pub logical_offset: u64,
    pub logical_len: u32,
    /// Low 32 bits of the XXH64 of the decompressed frame, when the
    /// descriptor's checksum bit is set.
    pub checksum: Option<u32>,
}

/// Immutable index over the data frames of a seekable stream.
///
/// Offsets are stored as parallel prefix-sum arrays; the logical-offset
/// column is the binary-search hot path for every read.
#[derive(Debug)]
pub struct FrameIndex {
    logical_offsets: Vec<u64>,
    compressed_offsets: Vec<u64>,
    logical_sizes: Vec<u32>,
    compressed_sizes: Vec<u32>,
    checksums: Option<Vec<u32>>,
    logical_size: u64,
    physical_size: u64,
}

impl FrameIndex {
    /// Parse the seek table from the end of a seekable stream.
    ///
    /// Validates the footer and skippable-frame magic numbers, the
    /// descriptor's reserved bits, the declared table size, and that the
    /// prefix sums account for every physical byte of the stream.
    pub fn parse<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let physical_size = seek(reader, SeekFrom::End(0))?;
        if physical_size < SKIPPABLE_HEADER_SIZE + FOOTER_SIZE {
            return Err(Error::Corrupt("stream too small for a seek table".into()));
        }

        seek(reader, SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let num_frames = read_u32(reader)?;
        let descriptor = read_u8(reader)?;
        let footer_magic = read_u32(reader)?;

        if footer_magic != SEEK_TABLE_FOOTER_MAGIC {
            return Err(Error::Corrupt(format!(
                "bad seek table footer magic {footer_magic:#010x}"
            )));
        }
        if descriptor & DESCRIPTOR_RESERVED_MASK != 0 {
            return Err(Error::Corrupt(format!(
                "reserved descriptor bits set ({descriptor:#04x})"
            )));
        }
        let has_checksums = descriptor & DESCRIPTOR_CHECKSUM_FLAG != 0;

        let entry_size: u64 = if has_checksums { 12 } else { 8 };
        let table_size = entry_size
            .checked_mul(num_frames as u64)
            .and_then(|s| s.checked_add(FOOTER_SIZE))
            .ok_or_else(|| Error::Corrupt("seek table size overflow".into()))?;
        let table_start = physical_size
            .checked_sub(table_size + SKIPPABLE_HEADER_SIZE)
            .ok_or_else(|| Error::Corrupt("seek table larger than the stream".into()))?;

        seek(reader, SeekFrom::Start(table_start))?;
        let skippable_magic = read_u32(reader)?;
        if skippable_magic != SKIPPABLE_FRAME_MAGIC {
            return Err(Error::Corrupt(format!(
                "bad skippable frame magic {skippable_magic:#010x}"
            )));
        }
        let declared_size = read_u32(reader)?;
        if declared_size as u64 != table_size {
            return Err(Error::Corrupt(format!(
                "skippable frame declares {declared_size} bytes, footer implies {table_size}"
            )));
        }

        let count = num_frames as usize;
        let mut index = Self {
            logical_offsets: Vec::with_capacity(count),
            compressed_offsets: Vec::with_capacity(count),
            logical_sizes: Vec::with_capacity(count),
            compressed_sizes: Vec::with_capacity(count),
            checksums: has_checksums.then(|| Vec::with_capacity(count)),
            logical_size: 0,
            physical_size,
        };

        let mut compressed_offset = 0u64;
        let mut logical_offset = 0u64;
        for _ in 0..num_frames {
            let compressed_size = read_u32(reader)?;
            let logical_size = read_u32(reader)?;

            index.compressed_offsets.push(compressed_offset);
            index.logical_offsets.push(logical_offset);
            index.compressed_sizes.push(compressed_size);
            index.logical_sizes.push(logical_size);
            if let Some(checksums) = index.checksums.as_mut() {
                checksums.push(read_u32(reader)?);
            }

            compressed_offset += compressed_size as u64;
            logical_offset += logical_size as u64;
        }

        if compressed_offset + SKIPPABLE_HEADER_SIZE + table_size != physical_size {
            return Err(Error::Corrupt(format!(
                "seek table covers {compressed_offset} compressed bytes, stream holds {}",
                physical_size - SKIPPABLE_HEADER_SIZE - table_size
            )));
        }

        index.logical_size = logical_offset;
        Ok(index)
    }

    pub fn frame_count(&self) -> usize {
        self.logical_offsets.len()
    }

    /// Total size of the decompressed stream.
    pub fn logical_size(&self) -> u64 {
        self.logical_size
    }

    /// Total size of the compressed stream, seek table included.
    pub fn physical_size(&self) -> u64 {
        self.physical_size
    }

    pub fn entry(&self, index: usize) -> FrameEntry {
        FrameEntry {
            index,
            compressed_offset: self.compressed_offsets[index],
            compressed_len: self.compressed_sizes[index],
            logical_offset: self.logical_offsets[index],
            logical_len: self.logical_sizes[index],
            checksum: self.checksums.as_ref().map(|c| c[index]),
        }
    }

    /// Find the frame whose logical range contains `logical_offset`.
    ///
    /// An offset on a frame boundary resolves to the frame that starts
    /// there; zero-length frames can never win because a later frame
    /// shares their logical offset.
    pub fn find(&self, logical_offset: u64) -> Option<usize> {
        if logical_offset >= self.logical_size {
            return None;
        }
        let following = self
            .logical_offsets
            .partition_point(|&start| start <= logical_offset);
        Some(following - 1)
    }
}

fn seek<R: Seek>(reader: &mut R, pos: SeekFrom) -> Result<u64> {
    reader.seek(pos).map_err(Error::from)
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    reader.read_u32::<LittleEndian>().map_err(Error::from)
}

fn read_u8<R: Read>(reader: &mut R) -> Result<u8> {
    reader.read_u8().map_err(Error::from)
}
