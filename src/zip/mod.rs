//! ZIP archive codec.
//!
//! This module reads and writes the ZIP container on top of `byteorder`
//! (record parsing), `flate2` (DEFLATE) and `crc32fast`.
//!
//! ## Architecture
//!
//! - [`structures`]: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - [`parser`]: Low-level parsing of the central directory from a [`ReadAt`](crate::io::ReadAt) source
//! - [`stream`]: Forward-only decompression of one entry's content
//! - [`writer`]: Streaming creation of a new archive
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! Reading starts from the EOCD, so listing an archive never touches entry
//! data. Writing goes strictly front to back, so an archive can be produced
//! without knowing entry sizes in advance.
//!
//! ## Supported Features
//!
//! - Standard ZIP format (PKZIP APPNOTE 6.3.x compatible)
//! - ZIP64 extensions for reading archives > 4GB
//! - STORED (no compression) and DEFLATE compression methods
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support
//! - No BZIP2, LZMA, or other compression methods
//! - Written archives use classic (non-ZIP64) records

mod parser;
mod stream;
mod structures;
mod writer;

pub use parser::ZipParser;
pub use stream::EntryStream;
pub use structures::*;
pub use writer::ZipSink;
