//! Forward-only decompression of a single entry.

use flate2::{Decompress, FlushDecompress, Status};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::io::{ReadAt, read_exact_at};

use super::parser::ZipParser;
use super::structures::{CompressionMethod, ZipFileEntry};

/// Reads one entry's content from the start, once. It cannot seek; reading
/// from an earlier position means opening a new stream.
///
/// The CRC-32 and length are checked when the end of the entry is reached.
pub struct EntryStream {
    reader: Arc<dyn ReadAt>,
    name: String,
    method: CompressionMethod,
    next_offset: u64,
    compressed_left: u64,
    input: Vec<u8>,
    input_pos: usize,
    chunk_size: usize,
    inflater: Decompress,
    inflate_done: bool,
    crc: crc32fast::Hasher,
    produced: u64,
    expected_size: u64,
    expected_crc: u32,
    verified: bool,
}

impl EntryStream {
    pub async fn open(
        reader: Arc<dyn ReadAt>,
        entry: &ZipFileEntry,
        chunk_size: usize,
    ) -> Result<Self> {
        if entry.is_encrypted() {
            return Err(Error::not_supported(format!(
                "{} is encrypted",
                entry.file_name
            )));
        }
        if let CompressionMethod::Unknown(method) = entry.compression_method {
            return Err(Error::not_supported(format!(
                "{} uses compression method {method}",
                entry.file_name
            )));
        }

        let data_offset = ZipParser::new(reader.clone()).data_offset(entry).await?;
        if data_offset.saturating_add(entry.compressed_size) > reader.size() {
            return Err(Error::malformed(format!(
                "data of {} runs past the end of the archive",
                entry.file_name
            )));
        }

        Ok(Self {
            reader,
            name: entry.file_name.clone(),
            method: entry.compression_method,
            next_offset: data_offset,
            compressed_left: entry.compressed_size,
            input: Vec::new(),
            input_pos: 0,
            chunk_size: chunk_size.max(1),
            inflater: Decompress::new(false),
            // Some writers store empty files with no deflate stream at all.
            inflate_done: entry.compressed_size == 0,
            crc: crc32fast::Hasher::new(),
            produced: 0,
            expected_size: entry.uncompressed_size,
            expected_crc: entry.crc32,
            verified: false,
        })
    }

    /// Number of uncompressed bytes produced so far.
    pub fn position(&self) -> u64 {
        self.produced
    }

    /// Reads the next bytes of content. `Ok(0)` means end of entry.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || self.verified {
            return Ok(0);
        }

        let n = match self.method {
            CompressionMethod::Stored => self.read_stored(buf).await?,
            _ => self.read_deflated(buf).await?,
        };

        if n == 0 {
            self.verify()?;
            return Ok(0);
        }

        self.crc.update(&buf[..n]);
        self.produced += n as u64;
        if self.produced > self.expected_size {
            return Err(Error::malformed(format!(
                "{} is longer than its recorded size",
                self.name
            )));
        }
        Ok(n)
    }

    async fn read_stored(&mut self, buf: &mut [u8]) -> Result<usize> {
        let want = (buf.len() as u64).min(self.compressed_left) as usize;
        if want == 0 {
            return Ok(0);
        }
        read_exact_at(&*self.reader, self.next_offset, &mut buf[..want]).await?;
        self.next_offset += want as u64;
        self.compressed_left -= want as u64;
        Ok(want)
    }

    async fn read_deflated(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            if self.inflate_done {
                return Ok(0);
            }
            if self.input_pos == self.input.len() && self.compressed_left > 0 {
                self.refill().await?;
            }

            let before_in = self.inflater.total_in();
            let before_out = self.inflater.total_out();
            let status = self
                .inflater
                .decompress(&self.input[self.input_pos..], buf, FlushDecompress::None)
                .map_err(|e| Error::malformed(format!("{}: {e}", self.name)))?;
            let consumed = (self.inflater.total_in() - before_in) as usize;
            let produced = (self.inflater.total_out() - before_out) as usize;
            self.input_pos += consumed;

            if status == Status::StreamEnd {
                self.inflate_done = true;
            }
            if produced > 0 {
                return Ok(produced);
            }
            if consumed == 0 && !self.inflate_done {
                let exhausted = self.input_pos == self.input.len() && self.compressed_left == 0;
                return Err(Error::malformed(if exhausted {
                    format!("{} ends mid-stream", self.name)
                } else {
                    format!("{} does not decompress", self.name)
                }));
            }
        }
    }

    async fn refill(&mut self) -> Result<()> {
        let want = (self.chunk_size as u64).min(self.compressed_left) as usize;
        self.input.resize(want, 0);
        read_exact_at(&*self.reader, self.next_offset, &mut self.input).await?;
        self.next_offset += want as u64;
        self.compressed_left -= want as u64;
        self.input_pos = 0;
        Ok(())
    }

    fn verify(&mut self) -> Result<()> {
        if self.produced != self.expected_size {
            return Err(Error::malformed(format!(
                "{} is {} bytes, expected {}",
                self.name, self.produced, self.expected_size
            )));
        }
        let crc = std::mem::take(&mut self.crc).finalize();
        if crc != self.expected_crc {
            return Err(Error::malformed(format!(
                "{} failed its CRC check ({crc:08x} != {:08x})",
                self.name, self.expected_crc
            )));
        }
        self.verified = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryReader;
    use crate::zip::ZipSink;

    async fn single_file(content: &[u8]) -> (Arc<dyn ReadAt>, ZipFileEntry) {
        let mut sink = ZipSink::new(Vec::new(), 6);
        sink.start_file("f.bin").await.unwrap();
        sink.write_data(content).await.unwrap();
        sink.finish_file().await.unwrap();
        let bytes = sink.finish().await.unwrap();
        let reader: Arc<dyn ReadAt> = Arc::new(MemoryReader::new(bytes));
        let entry = ZipParser::new(reader.clone())
            .read_central_directory()
            .await
            .unwrap()
            .remove(0);
        (reader, entry)
    }

    async fn drain(stream: &mut EntryStream, buf_size: usize) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; buf_size];
        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    #[tokio::test]
    async fn inflates_with_tiny_refills_and_buffers() {
        let content: Vec<u8> = (0..50_000u32).map(|i| (i * 7 % 251) as u8).collect();
        let (reader, entry) = single_file(&content).await;

        let mut stream = EntryStream::open(reader, &entry, 13).await.unwrap();
        assert_eq!(drain(&mut stream, 7).await.unwrap(), content);
        assert_eq!(stream.position(), content.len() as u64);
        // Past the end stays at end.
        assert_eq!(stream.read(&mut [0u8; 4]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_entry_reads_as_empty() {
        let (reader, entry) = single_file(b"").await;
        let mut stream = EntryStream::open(reader, &entry, 64).await.unwrap();
        assert!(drain(&mut stream, 16).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn crc_mismatch_is_reported_at_end() {
        let (reader, mut entry) = single_file(b"checksummed content").await;
        entry.crc32 ^= 1;
        let mut stream = EntryStream::open(reader, &entry, 64).await.unwrap();
        assert!(matches!(
            drain(&mut stream, 64).await,
            Err(Error::MalformedArchive(_))
        ));
    }

    #[tokio::test]
    async fn unknown_methods_and_encryption_are_unsupported() {
        let (reader, mut entry) = single_file(b"x").await;
        entry.compression_method = CompressionMethod::Unknown(14);
        assert!(matches!(
            EntryStream::open(reader.clone(), &entry, 64).await,
            Err(Error::NotSupported(_))
        ));

        entry.compression_method = CompressionMethod::Deflate;
        entry.flags |= crate::zip::FLAG_ENCRYPTED;
        assert!(matches!(
            EntryStream::open(reader, &entry, 64).await,
            Err(Error::NotSupported(_))
        ));
    }
}
