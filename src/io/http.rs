//! HTTP Range request source for remote compressed databases.
//!
//! Implements random-access reading from HTTP servers using the Range
//! request header (RFC 7233), so that only the compressed frames a query
//! touches are ever transferred.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::StatusCode;

use super::RandomSource;
use crate::config::VfsOptions;
use crate::error::{Error, Result};

/// Number of aligned blocks kept in the read cache.
const BLOCK_CACHE_SLOTS: usize = 16;

/// Base delay for the retry backoff; quadruples per attempt
/// (50 ms, 200 ms, 800 ms).
const RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

/// HTTP Range source for remote seekable-zstd files.
///
/// The remote server must honor `Range: bytes=` requests with `206 Partial
/// Content` responses. A `200` response to a ranged request means the
/// server ignored the header and is reported as corruption rather than
/// silently downloading the whole file.
///
/// Small reads are served through a cache of aligned blocks (block size
/// from [`VfsOptions::http_block_size`]) so that the many page-sized reads
/// a query issues against one frame coalesce into few requests. Reads of a
/// block size or more bypass the cache.
///
/// Connection semantics are pooled: one `reqwest` client per source,
/// reusing connections across range requests.
///
/// Transient network errors and `5xx` responses are retried with
/// exponential backoff before they surface as [`Error::Transient`].
#[derive(Debug)]
pub struct HttpRangeSource {
    /// HTTP client with connection pooling.
    client: Client,
    /// The URL of the remote file.
    url: String,
    /// Total size of the remote file in bytes.
    size: u64,
    /// Maximum number of retries for transient failures.
    retries: u32,
    /// Aligned block size for the read cache.
    block_size: usize,
    cache: Mutex<BlockCache>,
    /// Cumulative bytes transferred from the network.
    transferred_bytes: AtomicU64,
}

impl HttpRangeSource {
    /// Create a new HTTP Range source for the given URL.
    ///
    /// Resolves the remote size via a `HEAD` request when the server
    /// reports a usable `Content-Length`, falling back to a sentinel
    /// `GET Range: bytes=0-0` request parsed from `Content-Range`.
    pub fn new(url: &str, options: &VfsOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(options.http_timeout)
            .build()
            .map_err(|e| Error::Io(e.to_string()))?;

        let size = resolve_size(&client, url)?;
        debug!("resolved {url}: {size} bytes");

        Ok(Self {
            client,
            url: url.to_string(),
            size,
            retries: options.http_retries,
            block_size: options.http_block_size.max(1),
            cache: Mutex::new(BlockCache::new(BLOCK_CACHE_SLOTS)),
            transferred_bytes: AtomicU64::new(0),
        })
    }

    /// Get the total bytes transferred from the network so far.
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }

    /// Fetch `bytes=start-end` (inclusive) with retries. The caller has
    /// already clamped the range to the resource size.
    fn fetch_range(&self, start: u64, end: u64) -> Result<Vec<u8>> {
        let expected = (end - start + 1) as usize;
        let range = format!("bytes={start}-{end}");
        let mut attempt: u32 = 0;

        loop {
            let failure = match self.client.get(&self.url).header(RANGE, &range).send() {
                Ok(resp) => match resp.status() {
                    StatusCode::PARTIAL_CONTENT => match resp.bytes() {
                        Ok(body) => {
                            if body.len() < expected {
                                return Err(Error::Corrupt(format!(
                                    "range {range} returned {} bytes, expected {expected}",
                                    body.len()
                                )));
                            }
                            self.transferred_bytes
                                .fetch_add(expected as u64, Ordering::Relaxed);
                            return Ok(body[..expected].to_vec());
                        }
                        Err(e) => Error::Transient(e.to_string()),
                    },
                    StatusCode::OK => {
                        return Err(Error::Corrupt(
                            "server ignored the range request".to_string(),
                        ));
                    }
                    StatusCode::RANGE_NOT_SATISFIABLE => return Ok(Vec::new()),
                    status if status.is_server_error() => {
                        Error::Transient(format!("http status {status}"))
                    }
                    status => return Err(Error::Io(format!("http status {status}"))),
                },
                Err(e) => request_error(e),
            };

            if !matches!(failure, Error::Transient(_)) {
                return Err(failure);
            }
            if attempt >= self.retries {
                return Err(failure);
            }
            let delay = RETRY_BASE_DELAY * 4u32.saturating_pow(attempt);
            warn!(
                "range request failed ({failure}), retry {}/{} in {delay:?}",
                attempt + 1,
                self.retries
            );
            thread::sleep(delay);
            attempt += 1;
        }
    }

    /// Fetch the aligned block starting at `block_start`, through the cache.
    fn block(&self, block_start: u64) -> Result<Arc<Vec<u8>>> {
        if let Some(block) = self.cache.lock()?.get(block_start) {
            return Ok(block);
        }

        let end = (block_start + self.block_size as u64).min(self.size) - 1;
        let block = Arc::new(self.fetch_range(block_start, end)?);
        self.cache.lock()?.insert(block_start, Arc::clone(&block));
        Ok(block)
    }
}

impl RandomSource for HttpRangeSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || offset >= self.size {
            return Ok(0);
        }

        let end = (offset + buf.len() as u64).min(self.size);
        let want = (end - offset) as usize;

        // Big reads (whole frames) go straight to the network; the block
        // cache only earns its keep for the page-sized reads in between.
        if want >= self.block_size {
            let body = self.fetch_range(offset, end - 1)?;
            buf[..body.len()].copy_from_slice(&body);
            return Ok(body.len());
        }

        let mut copied = 0usize;
        while copied < want {
            let pos = offset + copied as u64;
            let block_start = pos - pos % self.block_size as u64;
            let block = self.block(block_start)?;

            let skip = (pos - block_start) as usize;
            if skip >= block.len() {
                break;
            }
            let n = (block.len() - skip).min(want - copied);
            buf[copied..copied + n].copy_from_slice(&block[skip..skip + n]);
            copied += n;
        }
        Ok(copied)
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// Discover the remote size: `HEAD` + `Content-Length` preferred, sentinel
/// one-byte range request otherwise.
fn resolve_size(client: &Client, url: &str) -> Result<u64> {
    match client.head(url).send() {
        Ok(resp) if resp.status() == StatusCode::NOT_FOUND => {
            return Err(Error::NotFound(url.to_string()));
        }
        Ok(resp) if resp.status().is_success() => {
            let length = resp
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            // A zero Content-Length on HEAD usually means the server did
            // not report the body size; fall through to the sentinel.
            if let Some(length) = length.filter(|&l| l > 0) {
                return Ok(length);
            }
        }
        Ok(_) | Err(_) => {}
    }

    let resp = client
        .get(url)
        .header(RANGE, "bytes=0-0")
        .send()
        .map_err(request_error)?;
    match resp.status() {
        StatusCode::PARTIAL_CONTENT => resp
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(content_range_total)
            .ok_or_else(|| Error::Corrupt("range response without a total size".to_string())),
        StatusCode::NOT_FOUND => Err(Error::NotFound(url.to_string())),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(Error::PermissionDenied(url.to_string()))
        }
        status if status.is_success() => Err(Error::Corrupt(
            "server does not honor range requests".to_string(),
        )),
        status => Err(Error::Io(format!("http status {status}"))),
    }
}

/// Parse the total size out of a `Content-Range: bytes 0-0/<total>` header.
fn content_range_total(value: &str) -> Option<u64> {
    value.strip_prefix("bytes ")?.rsplit('/').next()?.parse().ok()
}

fn request_error(err: reqwest::Error) -> Error {
    if err.is_timeout() || err.is_connect() {
        Error::Transient(err.to_string())
    } else {
        Error::Io(err.to_string())
    }
}

/// Bounded map of recently fetched blocks keyed by their aligned start
/// offset, evicting least-recently-used first.
#[derive(Debug)]
struct BlockCache {
    capacity: usize,
    blocks: HashMap<u64, Arc<Vec<u8>>>,
    order: VecDeque<u64>,
}

impl BlockCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            blocks: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&mut self, start: u64) -> Option<Arc<Vec<u8>>> {
        let block = self.blocks.get(&start).cloned()?;
        self.touch(start);
        Some(block)
    }

    fn insert(&mut self, start: u64, block: Arc<Vec<u8>>) {
        if self.blocks.insert(start, block).is_some() {
            self.touch(start);
            return;
        }
        while self.blocks.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.blocks.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(start);
    }

    fn touch(&mut self, start: u64) {
        if let Some(at) = self.order.iter().position(|&s| s == start) {
            self.order.remove(at);
            self.order.push_back(start);
        }
    }
}
