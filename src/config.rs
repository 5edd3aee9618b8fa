//! Tunables shared by every archive a registry opens.

use std::time::Duration;

/// Options threaded from the [`ArchiveRegistry`](crate::ArchiveRegistry) down
/// to the sources, streams and writers it creates.
///
/// ```
/// use zipdocs::ArchiveOptions;
///
/// let options = ArchiveOptions::default()
///     .chunk_size(16 * 1024)
///     .compression_level(9);
/// assert_eq!(options.chunk_size, 16 * 1024);
/// ```
#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    /// Size of compressed-data refills, skip buffers and copy buffers.
    pub chunk_size: usize,
    /// Number of chunks buffered between an [`EntryWriter`](crate::EntryWriter)
    /// and the background writer before `write` waits.
    pub pipe_capacity: usize,
    /// DEFLATE level (0-9) for file entries written in write mode.
    pub compression_level: u32,
    /// Request timeout for remote sources.
    pub http_timeout: Duration,
    /// Retries per range request on timeout or connection errors.
    pub http_max_retry: u32,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            pipe_capacity: 16,
            compression_level: 6,
            http_timeout: Duration::from_secs(30),
            http_max_retry: 10,
        }
    }
}

impl ArchiveOptions {
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn pipe_capacity(mut self, pipe_capacity: usize) -> Self {
        self.pipe_capacity = pipe_capacity.max(1);
        self
    }

    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(9);
        self
    }

    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn http_max_retry(mut self, retries: u32) -> Self {
        self.http_max_retry = retries;
        self
    }
}
