//! Seekable reads over a forward-only entry stream.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::io::ReadAt;
use crate::zip::{EntryStream, ZipFileEntry};

/// Reads one entry at arbitrary offsets.
///
/// Forward reads continue the current decompression stream, skipping any gap.
/// A read before the current position starts the stream over from offset 0;
/// nothing already decompressed is cached.
pub struct RandomAccessProxy {
    reader: Arc<dyn ReadAt>,
    record: ZipFileEntry,
    stream: EntryStream,
    current_offset: u64,
    chunk_size: usize,
    skip_buf: Vec<u8>,
    cancel: CancellationToken,
    restarts: u32,
}

impl RandomAccessProxy {
    pub async fn open(reader: Arc<dyn ReadAt>, record: ZipFileEntry, chunk_size: usize) -> Result<Self> {
        let stream = EntryStream::open(reader.clone(), &record, chunk_size).await?;
        Ok(Self {
            reader,
            record,
            stream,
            current_offset: 0,
            chunk_size: chunk_size.max(1),
            skip_buf: Vec::new(),
            cancel: CancellationToken::new(),
            restarts: 0,
        })
    }

    /// Uncompressed size, from the archive metadata.
    pub fn size(&self) -> u64 {
        self.record.uncompressed_size
    }

    /// Offset the next sequential read would start at.
    pub fn position(&self) -> u64 {
        self.current_offset
    }

    /// How many times a backward read restarted decompression.
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    /// Checked once per chunk by every read; once cancelled, reads fail with
    /// [`Error::Cancelled`].
    pub fn set_cancellation(&mut self, token: CancellationToken) {
        self.cancel = token;
    }

    /// Reads up to `length` bytes at `offset` into `out`.
    ///
    /// Returns fewer bytes only at the end of the entry, and 0 for offsets at
    /// or beyond it.
    pub async fn read(&mut self, offset: u64, length: usize, out: &mut [u8]) -> Result<usize> {
        let length = length.min(out.len());

        if offset < self.current_offset {
            self.stream = EntryStream::open(self.reader.clone(), &self.record, self.chunk_size).await?;
            self.current_offset = 0;
            self.restarts += 1;
        }

        while self.current_offset < offset {
            self.check_cancelled()?;
            let want = (offset - self.current_offset).min(self.chunk_size as u64) as usize;
            if self.skip_buf.len() < want {
                self.skip_buf.resize(want, 0);
            }
            let n = self.stream.read(&mut self.skip_buf[..want]).await?;
            if n == 0 {
                return Ok(0);
            }
            self.current_offset += n as u64;
        }

        let mut total = 0;
        while total < length {
            self.check_cancelled()?;
            let n = self.stream.read(&mut out[total..length]).await?;
            if n == 0 {
                break;
            }
            total += n;
            self.current_offset += n as u64;
        }
        Ok(total)
    }

    /// Closes the stream. Dropping the proxy has the same effect.
    pub fn release(self) {}

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryReader;
    use crate::zip::{ZipParser, ZipSink};

    fn content() -> Vec<u8> {
        (0..300_000u32).map(|i| (i.wrapping_mul(2654435761) >> 13) as u8).collect()
    }

    async fn proxy(content: &[u8], chunk_size: usize) -> RandomAccessProxy {
        let mut sink = ZipSink::new(Vec::new(), 6);
        sink.start_file("data.bin").await.unwrap();
        sink.write_data(content).await.unwrap();
        sink.finish_file().await.unwrap();
        let reader: Arc<dyn ReadAt> = Arc::new(MemoryReader::new(sink.finish().await.unwrap()));
        let record = ZipParser::new(reader.clone())
            .read_central_directory()
            .await
            .unwrap()
            .remove(0);
        RandomAccessProxy::open(reader, record, chunk_size).await.unwrap()
    }

    #[tokio::test]
    async fn out_of_order_reads_match_sequential_content() {
        let content = content();
        let mut proxy = proxy(&content, 4096).await;
        assert_eq!(proxy.size(), content.len() as u64);

        let mut buf = vec![0u8; 1000];
        for offset in [100u64, 50, 200, 250_000, 10, 10] {
            let n = proxy.read(offset, 1000, &mut buf).await.unwrap();
            assert_eq!(n, 1000);
            assert_eq!(&buf[..n], &content[offset as usize..offset as usize + 1000]);
        }
        // Every read starting before the previous read's end restarts: 50, 200, 10, 10.
        assert_eq!(proxy.restarts(), 4);
    }

    #[tokio::test]
    async fn forward_reads_never_restart() {
        let content = content();
        let mut proxy = proxy(&content, 1 << 16).await;
        let mut buf = vec![0u8; 7777];
        let mut offset = 0u64;
        let mut collected = Vec::new();
        loop {
            let n = proxy.read(offset, buf.len(), &mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            collected.extend_from_slice(&buf[..n]);
            offset += n as u64 + 3;
        }
        let expected: Vec<u8> = content
            .chunks(7780)
            .flat_map(|c| c[..c.len().min(7777)].to_vec())
            .collect();
        assert_eq!(collected, expected);
        assert_eq!(proxy.restarts(), 0);
    }

    #[tokio::test]
    async fn reads_at_the_end_are_short() {
        let content = content();
        let mut proxy = proxy(&content, 4096).await;
        let mut buf = vec![0u8; 500];
        let tail = content.len() as u64 - 200;
        assert_eq!(proxy.read(tail, 500, &mut buf).await.unwrap(), 200);
        assert_eq!(&buf[..200], &content[content.len() - 200..]);
        assert_eq!(proxy.read(content.len() as u64 + 10, 500, &mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn length_is_capped_by_the_buffer() {
        let content = content();
        let mut proxy = proxy(&content, 4096).await;
        let mut buf = vec![0u8; 16];
        assert_eq!(proxy.read(0, 1000, &mut buf).await.unwrap(), 16);
        assert_eq!(proxy.position(), 16);
    }

    #[tokio::test]
    async fn cancelled_reads_fail() {
        let content = content();
        let mut proxy = proxy(&content, 4096).await;
        let token = CancellationToken::new();
        proxy.set_cancellation(token.clone());
        token.cancel();
        let mut buf = vec![0u8; 16];
        assert!(matches!(proxy.read(100_000, 16, &mut buf).await, Err(Error::Cancelled)));
    }
}
