//! Random-access byte sources an archive can be read from.
//!
//! A source string is interpreted as an `http://`/`https://` URL, a `file://`
//! URI, or a plain filesystem path. Sources that cannot be read at arbitrary
//! offsets (FIFOs, servers without Range support) are first spilled into an
//! anonymous temporary file.

mod http;
mod local;
mod memory;
mod temp;

pub use http::HttpRangeReader;
pub use local::LocalFileReader;
pub use memory::MemoryReader;
pub use temp::SpillFile;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::config::ArchiveOptions;
use crate::error::{Error, Result};

/// Trait for random access reading from a data source
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;
}

/// Fills `buf` completely from `offset`, failing if the source ends first.
pub async fn read_exact_at<R: ReadAt + ?Sized>(reader: &R, offset: u64, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read_at(offset + filled as u64, &mut buf[filled..]).await?;
        if n == 0 {
            return Err(Error::malformed(format!(
                "unexpected end of data at offset {}",
                offset + filled as u64
            )));
        }
        filled += n;
    }
    Ok(())
}

pub fn is_http_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Maps a `file://` URI or plain path to a filesystem path.
pub fn local_path(source: &str) -> &Path {
    Path::new(source.strip_prefix("file://").unwrap_or(source))
}

/// Opens `source` for random-access reading.
pub async fn open_source(source: &str, options: &ArchiveOptions) -> Result<Arc<dyn ReadAt>> {
    if is_http_url(source) {
        return http::open(source, options).await;
    }

    let path = local_path(source);
    let metadata = tokio::fs::metadata(path).await?;
    if metadata.is_dir() {
        return Err(Error::not_supported(format!("{} is a directory", path.display())));
    }
    if metadata.is_file() {
        return Ok(Arc::new(LocalFileReader::new(path)?));
    }

    // Pipes and devices cannot be read at an offset.
    let input = tokio::fs::File::open(path).await?;
    let mut spill = SpillFile::new()?;
    let copied = spill.copy_from(input).await?;
    debug!(source, copied, "spilled non-seekable source to a temporary file");
    Ok(Arc::new(spill.into_reader().await?))
}
