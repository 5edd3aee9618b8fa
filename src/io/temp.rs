use tokio::io::{AsyncRead, AsyncWriteExt};

use super::LocalFileReader;
use crate::error::Result;

/// An anonymous temporary file that a non-seekable source is copied into.
///
/// The file is unlinked as soon as it is created; it lives exactly as long as
/// the handles to it, so the last reader dropping it reclaims the space.
pub struct SpillFile {
    handle: std::fs::File,
    writer: tokio::fs::File,
    written: u64,
}

impl SpillFile {
    pub fn new() -> Result<Self> {
        let handle = tempfile::tempfile()?;
        let writer = tokio::fs::File::from_std(handle.try_clone()?);
        Ok(Self {
            handle,
            writer,
            written: 0,
        })
    }

    pub async fn write_all(&mut self, chunk: &[u8]) -> Result<()> {
        self.writer.write_all(chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Copies `input` to end of stream, returning the number of bytes copied.
    pub async fn copy_from<R: AsyncRead + Unpin>(&mut self, mut input: R) -> Result<u64> {
        let copied = tokio::io::copy(&mut input, &mut self.writer).await?;
        self.written += copied;
        Ok(copied)
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub async fn into_reader(mut self) -> Result<LocalFileReader> {
        self.writer.flush().await?;
        self.writer.sync_data().await?;
        drop(self.writer);
        LocalFileReader::from_file(self.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ReadAt;

    #[tokio::test]
    async fn spilled_bytes_are_readable_at_offsets() {
        let mut spill = SpillFile::new().unwrap();
        spill.write_all(b"hello ").await.unwrap();
        spill.copy_from(&b"world"[..]).await.unwrap();
        assert_eq!(spill.written(), 11);

        let reader = spill.into_reader().await.unwrap();
        assert_eq!(reader.size(), 11);
        let mut buf = [0u8; 5];
        reader.read_at(6, &mut buf).await.unwrap();
        assert_eq!(&buf, b"world");
    }
}
