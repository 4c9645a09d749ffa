use std::time::Duration;

/// Tuning knobs for the `"zstd"` VFS, consumed at registration time.
///
/// The defaults match what the VFS uses when registered through
/// [`register`](crate::register); pass custom options via
/// [`register_with`](crate::register_with).
#[derive(Debug, Clone)]
pub struct VfsOptions {
    /// Per-request deadline for the HTTP source.
    pub http_timeout: Duration,
    /// Maximum retries for transient HTTP failures before they surface.
    pub http_retries: u32,
    /// Read-ahead/cache block size for the HTTP source, in bytes.
    pub http_block_size: usize,
    /// Capacity of the decompressed-frame LRU cache, in frames.
    /// Zero disables frame caching.
    pub frame_cache_max_frames: usize,
}

impl Default for VfsOptions {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(30),
            http_retries: 3,
            http_block_size: 128 * 1024,
            frame_cache_max_frames: 8,
        }
    }
}
