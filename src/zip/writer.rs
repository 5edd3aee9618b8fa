//! Streaming ZIP writer.
//!
//! Entries are written front to back with no seeking: each file's local
//! header carries the data-descriptor flag, its DEFLATE data follows as it
//! arrives, and sizes plus CRC come after the data. The central directory is
//! written once, by [`ZipSink::finish`].

use flate2::{Compress, Compression, FlushCompress, Status};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

use super::structures::*;

const OUTPUT_RESERVE: usize = 32 * 1024;

/// Everything the central directory needs to know about one written entry.
struct CentralRecord {
    name: String,
    method: CompressionMethod,
    flags: u16,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    lfh_offset: u64,
    mod_time: u16,
    mod_date: u16,
    external_attrs: u32,
}

/// A file entry between `start_file` and `finish_file`.
struct OpenFile {
    record: CentralRecord,
    compress: Compress,
    crc: crc32fast::Hasher,
    buf: Vec<u8>,
}

/// Output side of the codec: turns a sequence of entries into a ZIP file.
pub struct ZipSink<W: AsyncWrite + Unpin> {
    out: W,
    offset: u64,
    level: Compression,
    central: Vec<CentralRecord>,
    current: Option<OpenFile>,
}

impl<W: AsyncWrite + Unpin> ZipSink<W> {
    pub fn new(out: W, level: u32) -> Self {
        Self {
            out,
            offset: 0,
            level: Compression::new(level),
            central: Vec::new(),
            current: None,
        }
    }

    /// Number of entries written or in progress.
    pub fn entry_count(&self) -> usize {
        self.central.len() + usize::from(self.current.is_some())
    }

    /// Writes a zero-length directory record. `name` must end with `/`.
    pub async fn add_directory(&mut self, name: &str) -> Result<()> {
        debug_assert!(name.ends_with('/'));
        self.finish_file().await?;
        let record = self.new_record(name, CompressionMethod::Stored, FLAG_UTF8, true)?;
        self.write_local_header(&record).await?;
        self.central.push(record);
        Ok(())
    }

    /// Begins a DEFLATE file entry; content follows through `write_data`.
    pub async fn start_file(&mut self, name: &str) -> Result<()> {
        self.finish_file().await?;
        let record = self.new_record(
            name,
            CompressionMethod::Deflate,
            FLAG_UTF8 | FLAG_DATA_DESCRIPTOR,
            false,
        )?;
        self.write_local_header(&record).await?;
        self.current = Some(OpenFile {
            record,
            compress: Compress::new(self.level, false),
            crc: crc32fast::Hasher::new(),
            buf: Vec::with_capacity(OUTPUT_RESERVE),
        });
        Ok(())
    }

    /// Appends content to the open file entry.
    pub async fn write_data(&mut self, data: &[u8]) -> Result<()> {
        let Some(file) = self.current.as_mut() else {
            return Err(Error::not_supported("no file entry is open"));
        };
        file.crc.update(data);
        file.record.uncompressed_size += data.len() as u64;
        if file.record.uncompressed_size > u32::MAX as u64 {
            return Err(Error::not_supported(format!(
                "{} exceeds 4 GiB",
                file.record.name
            )));
        }
        deflate(&mut file.compress, data, false, &mut file.buf)?;
        if file.buf.len() >= OUTPUT_RESERVE {
            self.flush_compressed().await?;
        }
        Ok(())
    }

    /// Closes the open file entry, if any, returning its uncompressed size.
    pub async fn finish_file(&mut self) -> Result<u64> {
        let Some(file) = self.current.as_mut() else {
            return Ok(0);
        };
        deflate(&mut file.compress, &[], true, &mut file.buf)?;
        self.flush_compressed().await?;

        let Some(file) = self.current.take() else {
            return Ok(0);
        };
        let mut record = file.record;
        record.crc32 = file.crc.finalize();
        if record.compressed_size > u32::MAX as u64 {
            return Err(Error::not_supported(format!("{} exceeds 4 GiB", record.name)));
        }

        let mut descriptor = Vec::with_capacity(16);
        descriptor.extend_from_slice(DATA_DESCRIPTOR_SIGNATURE);
        descriptor.extend_from_slice(&record.crc32.to_le_bytes());
        descriptor.extend_from_slice(&(record.compressed_size as u32).to_le_bytes());
        descriptor.extend_from_slice(&(record.uncompressed_size as u32).to_le_bytes());
        self.write_raw(&descriptor).await?;

        let size = record.uncompressed_size;
        self.central.push(record);
        Ok(size)
    }

    /// Writes the central directory and end record, returning the output.
    pub async fn finish(mut self) -> Result<W> {
        self.finish_file().await?;

        let cd_offset = self.offset;
        if cd_offset > u32::MAX as u64 {
            return Err(Error::not_supported("archive exceeds 4 GiB"));
        }

        let mut cd = Vec::new();
        for record in &self.central {
            cd.extend_from_slice(CDFH_SIGNATURE);
            cd.extend_from_slice(&VERSION_MADE_BY.to_le_bytes());
            cd.extend_from_slice(&VERSION_NEEDED.to_le_bytes());
            cd.extend_from_slice(&record.flags.to_le_bytes());
            cd.extend_from_slice(&record.method.as_u16().to_le_bytes());
            cd.extend_from_slice(&record.mod_time.to_le_bytes());
            cd.extend_from_slice(&record.mod_date.to_le_bytes());
            cd.extend_from_slice(&record.crc32.to_le_bytes());
            cd.extend_from_slice(&(record.compressed_size as u32).to_le_bytes());
            cd.extend_from_slice(&(record.uncompressed_size as u32).to_le_bytes());
            cd.extend_from_slice(&(record.name.len() as u16).to_le_bytes());
            cd.extend_from_slice(&0u16.to_le_bytes()); // extra
            cd.extend_from_slice(&0u16.to_le_bytes()); // comment
            cd.extend_from_slice(&0u16.to_le_bytes()); // disk
            cd.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
            cd.extend_from_slice(&record.external_attrs.to_le_bytes());
            cd.extend_from_slice(&(record.lfh_offset as u32).to_le_bytes());
            cd.extend_from_slice(record.name.as_bytes());
        }

        let entries = self.central.len() as u16;
        EndOfCentralDirectory {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: entries,
            total_entries: entries,
            cd_size: cd.len() as u32,
            cd_offset: cd_offset as u32,
            comment_len: 0,
        }
        .write_to(&mut cd);

        self.write_raw(&cd).await?;
        self.out.flush().await?;
        Ok(self.out)
    }

    fn new_record(
        &self,
        name: &str,
        method: CompressionMethod,
        flags: u16,
        is_directory: bool,
    ) -> Result<CentralRecord> {
        if name.is_empty() || name.len() > u16::MAX as usize {
            return Err(Error::not_supported(format!("entry name length {}", name.len())));
        }
        if self.central.len() >= u16::MAX as usize - 1 {
            return Err(Error::not_supported("more than 65535 entries"));
        }
        if self.offset > u32::MAX as u64 {
            return Err(Error::not_supported("archive exceeds 4 GiB"));
        }
        let (mod_time, mod_date) = to_dos_datetime(chrono::Local::now().naive_local());
        Ok(CentralRecord {
            name: name.to_string(),
            method,
            flags,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            lfh_offset: self.offset,
            mod_time,
            mod_date,
            external_attrs: external_attrs(is_directory),
        })
    }

    async fn write_local_header(&mut self, record: &CentralRecord) -> Result<()> {
        let mut header = Vec::with_capacity(LFH_SIZE + record.name.len());
        header.extend_from_slice(LFH_SIGNATURE);
        header.extend_from_slice(&VERSION_NEEDED.to_le_bytes());
        header.extend_from_slice(&record.flags.to_le_bytes());
        header.extend_from_slice(&record.method.as_u16().to_le_bytes());
        header.extend_from_slice(&record.mod_time.to_le_bytes());
        header.extend_from_slice(&record.mod_date.to_le_bytes());
        // CRC and sizes: zero for directories, deferred to the descriptor for files.
        header.extend_from_slice(&0u32.to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());
        header.extend_from_slice(&(record.name.len() as u16).to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes());
        header.extend_from_slice(record.name.as_bytes());
        self.write_raw(&header).await
    }

    async fn flush_compressed(&mut self) -> Result<()> {
        let Some(file) = self.current.as_mut() else {
            return Ok(());
        };
        if file.buf.is_empty() {
            return Ok(());
        }
        self.out.write_all(&file.buf).await?;
        let written = file.buf.len() as u64;
        file.record.compressed_size += written;
        file.buf.clear();
        self.offset += written;
        Ok(())
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.out.write_all(bytes).await?;
        self.offset += bytes.len() as u64;
        Ok(())
    }
}

/// Runs `input` through the compressor into `out`. With `finish` the stream
/// is terminated; otherwise it returns once all input has been accepted.
fn deflate(compress: &mut Compress, mut input: &[u8], finish: bool, out: &mut Vec<u8>) -> Result<()> {
    let flush = if finish {
        FlushCompress::Finish
    } else {
        FlushCompress::None
    };
    loop {
        if out.capacity() - out.len() < OUTPUT_RESERVE / 4 {
            out.reserve(OUTPUT_RESERVE);
        }
        let before = compress.total_in();
        let status = compress
            .compress_vec(input, out, flush)
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        input = &input[(compress.total_in() - before) as usize..];

        if status == Status::StreamEnd {
            return Ok(());
        }
        if !finish && input.is_empty() && out.len() < out.capacity() {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_archive_is_just_an_end_record() {
        let bytes = ZipSink::new(Vec::new(), 6).finish().await.unwrap();
        assert_eq!(bytes.len(), EndOfCentralDirectory::SIZE);
        let eocd = EndOfCentralDirectory::from_bytes(&bytes).unwrap();
        assert_eq!(eocd.total_entries, 0);
    }

    #[tokio::test]
    async fn file_entry_is_deflated_with_a_descriptor() {
        let mut sink = ZipSink::new(Vec::new(), 9);
        sink.start_file("big.txt").await.unwrap();
        let content = vec![b'z'; 100_000];
        sink.write_data(&content[..40_000]).await.unwrap();
        sink.write_data(&content[40_000..]).await.unwrap();
        assert_eq!(sink.finish_file().await.unwrap(), 100_000);
        let bytes = sink.finish().await.unwrap();

        assert_eq!(&bytes[..4], LFH_SIGNATURE);
        let flags = u16::from_le_bytes([bytes[6], bytes[7]]);
        assert_ne!(flags & FLAG_DATA_DESCRIPTOR, 0);
        // Highly repetitive content must shrink.
        assert!(bytes.len() < 2_000);

        use std::io::Read;
        let data_start = LFH_SIZE + "big.txt".len();
        let mut decoded = Vec::new();
        flate2::read::DeflateDecoder::new(&bytes[data_start..])
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, content);
    }

    #[tokio::test]
    async fn central_records_parse_back() {
        use crate::io::MemoryReader;
        use crate::zip::ZipParser;
        use std::sync::Arc;

        let mut sink = ZipSink::new(Vec::new(), 6);
        sink.add_directory("docs/").await.unwrap();
        sink.start_file("docs/a.txt").await.unwrap();
        sink.write_data(b"alpha").await.unwrap();
        let bytes = sink.finish().await.unwrap();

        let parser = ZipParser::new(Arc::new(MemoryReader::new(bytes)));
        let records = parser.read_central_directory().await.unwrap();
        assert_eq!(records.len(), 2);

        let dir = &records[0];
        assert_eq!(dir.file_name, "docs/");
        assert!(dir.is_directory);
        assert_eq!(dir.compression_method, CompressionMethod::Stored);
        assert_eq!(dir.attribute_kind(), Some(true));

        let file = &records[1];
        assert_eq!(file.file_name, "docs/a.txt");
        assert_eq!(file.compression_method, CompressionMethod::Deflate);
        assert_eq!(file.uncompressed_size, 5);
        assert_eq!(file.crc32, crc32fast::hash(b"alpha"));
        assert_eq!(file.flags, FLAG_UTF8 | FLAG_DATA_DESCRIPTOR);
        assert_eq!(file.attribute_kind(), Some(false));
        assert!(file.lfh_offset > dir.lfh_offset);
    }

    #[tokio::test]
    async fn write_without_open_file_is_rejected() {
        let mut sink = ZipSink::new(Vec::new(), 6);
        assert!(matches!(
            sink.write_data(b"x").await,
            Err(Error::NotSupported(_))
        ));
    }
}
