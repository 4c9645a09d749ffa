//! # sqlite-zstd-vfs
//!
//! A read-only SQLite VFS for databases compressed with the Zstandard
//! seekable format.
//!
//! This library registers a VFS named `"zstd"` that presents a compressed
//! database to SQLite as an ordinary read-only file. Reads against the
//! decompressed byte stream are answered by decoding only the compressed
//! frames that cover the requested range, so queries never materialize the
//! whole database. The compressed file can live on the local filesystem or
//! behind any HTTP(S) server that supports Range requests.
//!
//! ## Features
//!
//! - Transparent random access into seekable-zstd streams via the trailing
//!   seek table
//! - Local file and HTTP Range sources behind one [`RandomSource`] trait
//! - Strict read-only semantics: writes, truncation, and journal/WAL side
//!   files are refused
//! - Block-level read-ahead cache for HTTP sources and an LRU cache of
//!   decompressed frames
//!
//! ## Example
//!
//! ```no_run
//! use rusqlite::{Connection, OpenFlags};
//!
//! fn main() -> anyhow::Result<()> {
//!     sqlite_zstd_vfs::register()?;
//!
//!     let conn = Connection::open_with_flags_and_vfs(
//!         "my-database.sqlite.zst",
//!         OpenFlags::SQLITE_OPEN_READ_ONLY,
//!         sqlite_zstd_vfs::VFS_NAME,
//!     )?;
//!     let rows: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |r| r.get(0))?;
//!     println!("{rows} rows");
//!     Ok(())
//! }
//! ```
//!
//! The same works for remote databases; pass an `http://` or `https://`
//! URL as the path and the VFS fetches byte ranges on demand.

mod config;
mod error;
mod io;
mod seekable;
mod vfs;

pub use config::VfsOptions;
pub use error::{Error, Result};
pub use io::{HttpRangeSource, LocalSource, RandomSource, SourceCursor};
pub use seekable::{CancelHandle, SeekableZstdReader};
pub use vfs::{register, register_with, ZstdFile, ZstdVfs, VFS_NAME};
