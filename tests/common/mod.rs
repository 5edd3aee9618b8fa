//! Fixture archives shared by the integration tests.

#![allow(dead_code)]

use byteorder::{LittleEndian, WriteBytesExt};
use std::path::Path;

use zipdocs::zip::{
    CDFH_SIGNATURE, EndOfCentralDirectory, LFH_SIGNATURE, VERSION_NEEDED, ZipSink,
};
use zipdocs::{AccessMode, ArchiveKey, RandomAccessProxy};

/// MS-DOS directory attribute bit.
pub const DOS_DIRECTORY: u32 = 0x10;

/// One record of a hand-assembled archive.
pub struct Stored<'a> {
    pub name: &'a str,
    pub data: &'a [u8],
    /// External attributes, interpreted as MS-DOS attributes.
    pub attrs: u32,
}

impl<'a> Stored<'a> {
    pub fn file(name: &'a str, data: &'a [u8]) -> Self {
        Self { name, data, attrs: 0 }
    }

    pub fn dir(name: &'a str) -> Self {
        Self {
            name,
            data: b"",
            attrs: DOS_DIRECTORY,
        }
    }
}

/// Assembles a STORED archive byte by byte, in exactly the record order
/// given, with no implied directory records.
pub fn stored_zip(records: &[Stored<'_>]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut offsets = Vec::new();

    for record in records {
        offsets.push(out.len() as u32);
        let crc = crc32fast::hash(record.data);
        out.extend_from_slice(LFH_SIGNATURE);
        out.write_u16::<LittleEndian>(VERSION_NEEDED).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap(); // flags
        out.write_u16::<LittleEndian>(0).unwrap(); // stored
        out.write_u16::<LittleEndian>(0).unwrap(); // time
        out.write_u16::<LittleEndian>((44 << 9) | (6 << 5) | 1).unwrap(); // 2024-06-01
        out.write_u32::<LittleEndian>(crc).unwrap();
        out.write_u32::<LittleEndian>(record.data.len() as u32).unwrap();
        out.write_u32::<LittleEndian>(record.data.len() as u32).unwrap();
        out.write_u16::<LittleEndian>(record.name.len() as u16).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.extend_from_slice(record.name.as_bytes());
        out.extend_from_slice(record.data);
    }

    let cd_offset = out.len() as u32;
    for (record, offset) in records.iter().zip(&offsets) {
        out.extend_from_slice(CDFH_SIGNATURE);
        out.write_u16::<LittleEndian>(20).unwrap(); // made by MS-DOS
        out.write_u16::<LittleEndian>(VERSION_NEEDED).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>((44 << 9) | (6 << 5) | 1).unwrap();
        out.write_u32::<LittleEndian>(crc32fast::hash(record.data)).unwrap();
        out.write_u32::<LittleEndian>(record.data.len() as u32).unwrap();
        out.write_u32::<LittleEndian>(record.data.len() as u32).unwrap();
        out.write_u16::<LittleEndian>(record.name.len() as u16).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap(); // extra
        out.write_u16::<LittleEndian>(0).unwrap(); // comment
        out.write_u16::<LittleEndian>(0).unwrap(); // disk
        out.write_u16::<LittleEndian>(0).unwrap(); // internal attrs
        out.write_u32::<LittleEndian>(record.attrs).unwrap();
        out.write_u32::<LittleEndian>(*offset).unwrap();
        out.extend_from_slice(record.name.as_bytes());
    }

    let cd_size = out.len() as u32 - cd_offset;
    EndOfCentralDirectory {
        disk_number: 0,
        disk_with_cd: 0,
        disk_entries: records.len() as u16,
        total_entries: records.len() as u16,
        cd_size,
        cd_offset,
        comment_len: 0,
    }
    .write_to(&mut out);
    out
}

/// Builds a DEFLATE archive with the crate's own writer. Names ending in `/`
/// become directory records.
pub async fn deflated_zip(records: &[(&str, &[u8])]) -> Vec<u8> {
    let mut sink = ZipSink::new(Vec::new(), 6);
    for (name, data) in records {
        if name.ends_with('/') {
            sink.add_directory(name).await.unwrap();
        } else {
            sink.start_file(name).await.unwrap();
            sink.write_data(data).await.unwrap();
            sink.finish_file().await.unwrap();
        }
    }
    sink.finish().await.unwrap()
}

/// Writes `bytes` to `dir/name` and returns a read-mode key for it.
pub fn save(dir: &Path, name: &str, bytes: &[u8]) -> ArchiveKey {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    ArchiveKey::new(path.to_string_lossy(), AccessMode::Read).unwrap()
}

/// Key for a not-yet-existing archive at `dir/name`.
pub fn key(dir: &Path, name: &str, mode: AccessMode) -> ArchiveKey {
    ArchiveKey::new(dir.join(name).to_string_lossy(), mode).unwrap()
}

/// Deterministic, poorly compressible content.
pub fn content(len: usize) -> Vec<u8> {
    let mut state = 0x2545_f491_u32;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

/// Reads a proxy sequentially from offset 0 to the end.
pub async fn read_to_end(proxy: &mut RandomAccessProxy) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; 4096];
    loop {
        let n = proxy.read(out.len() as u64, buf.len(), &mut buf).await.unwrap();
        if n == 0 {
            return out;
        }
        out.extend_from_slice(&buf[..n]);
    }
}
