//! Source-level tests: HTTP range reads and the seekable reader over real
//! files and a real (local) HTTP server.

mod common;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlite_zstd_vfs::{
    Error, HttpRangeSource, LocalSource, RandomSource, SeekableZstdReader, VfsOptions,
};

fn small_block_options() -> VfsOptions {
    VfsOptions {
        http_timeout: Duration::from_secs(10),
        http_block_size: 4 * 1024,
        ..VfsOptions::default()
    }
}

fn sample_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 131 % 251) as u8).collect()
}

#[test]
fn http_source_discovers_size_and_reads_exact_ranges() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let data = sample_data(100_000);
    fs::write(dir.path().join("blob.bin"), &data)?;
    let base_url = common::serve_directory(dir.path().to_path_buf());

    let source = HttpRangeSource::new(&format!("{base_url}/blob.bin"), &small_block_options())?;
    assert_eq!(source.size(), 100_000);

    // Small reads go through the block cache; repeat one to hit it.
    let mut buf = [0u8; 100];
    assert_eq!(source.read_at(5_000, &mut buf)?, 100);
    assert_eq!(&buf[..], &data[5_000..5_100]);
    let before = source.transferred_bytes();
    assert_eq!(source.read_at(5_050, &mut buf)?, 100);
    assert_eq!(&buf[..], &data[5_050..5_150]);
    assert_eq!(source.transferred_bytes(), before);

    // A big read bypasses the cache and still lines up byte for byte.
    let mut big = vec![0u8; 50_000];
    assert_eq!(source.read_at(25_000, &mut big)?, 50_000);
    assert_eq!(big, &data[25_000..75_000]);

    // Short read at the end, empty read past it.
    let mut tail = [0u8; 64];
    assert_eq!(source.read_at(99_990, &mut tail)?, 10);
    assert_eq!(&tail[..10], &data[99_990..]);
    assert_eq!(source.read_at(100_000, &mut tail)?, 0);
    Ok(())
}

#[test]
fn http_source_reports_missing_resources() {
    let dir = tempfile::tempdir().unwrap();
    let base_url = common::serve_directory(dir.path().to_path_buf());

    let err = HttpRangeSource::new(&format!("{base_url}/nope.bin"), &small_block_options())
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "{err}");
}

#[test]
fn seekable_reader_over_http_matches_the_original_bytes() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let data = sample_data(200_000);
    let compressed = common::seekable_compress(&data, 8 * 1024, true);
    fs::write(dir.path().join("data.zst"), &compressed)?;
    let base_url = common::serve_directory(dir.path().to_path_buf());

    let source = HttpRangeSource::new(&format!("{base_url}/data.zst"), &small_block_options())?;
    let reader = SeekableZstdReader::open(Arc::new(source) as Arc<dyn RandomSource>, 8)?;
    assert_eq!(reader.logical_size(), 200_000);

    for &(offset, len) in &[(0u64, 512usize), (8_191, 2), (77_777, 9_000), (199_000, 4_096)] {
        let mut buf = vec![0u8; len];
        let n = reader.read_at(offset, &mut buf)?;
        let expected = &data[offset as usize..(offset as usize + len).min(data.len())];
        assert_eq!(&buf[..n], expected);
    }
    Ok(())
}

#[test]
fn seekable_reader_over_a_local_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let data = sample_data(64 * 1024);
    let compressed = common::seekable_compress(&data, 4 * 1024, false);
    let path = dir.path().join("local.zst");
    fs::write(&path, &compressed)?;

    let source = LocalSource::open(&path)?;
    assert_eq!(source.size(), compressed.len() as u64);

    let reader = SeekableZstdReader::open(Arc::new(source) as Arc<dyn RandomSource>, 4)?;
    assert_eq!(reader.logical_size(), data.len() as u64);
    assert_eq!(reader.frame_count(), 16);

    let mut whole = vec![0u8; data.len()];
    assert_eq!(reader.read_at(0, &mut whole)?, data.len());
    assert_eq!(whole, data);
    Ok(())
}
