//! # zipdocs
//!
//! ZIP archives exposed as a virtual document tree.
//!
//! An archive is addressed by an [`ArchiveKey`] (its source plus an access
//! mode) and its entries by an [`ArchiveId`]. Clients take references through
//! an [`ArchiveRegistry`]; the first reference opens the archive in the
//! background, later ones share it, and the last release closes it.
//!
//! - Read mode indexes an existing archive's central directory once and serves
//!   listings, metadata and seekable entry content ([`RandomAccessProxy`]).
//!   Sources may be local files, `file://` URIs or HTTP URLs; remote archives
//!   are read with Range requests.
//! - Write mode builds a new archive: entries are created in the tree, then
//!   each file is streamed once through an [`EntryWriter`] and compressed
//!   straight into the output.
//!
//! ## Example
//!
//! ```no_run
//! use zipdocs::{AccessMode, ArchiveKey, ArchiveRegistry, mime};
//!
//! #[tokio::main]
//! async fn main() -> zipdocs::Result<()> {
//!     let registry = ArchiveRegistry::default();
//!
//!     let out = ArchiveKey::new("notes.zip", AccessMode::Write)?;
//!     registry.acquire(&out);
//!     let dir = registry.create_entry(&out.root(), mime::DIRECTORY, "notes").await?;
//!     let file = registry.create_entry(&dir, "text/plain", "todo.txt").await?;
//!     let mut writer = registry.open_for_write(&file).await?;
//!     writer.write(b"buy milk\n").await?;
//!     writer.finish().await?;
//!     registry.release(&out).await?;
//!
//!     let key = ArchiveKey::new("notes.zip", AccessMode::Read)?;
//!     registry.acquire(&key);
//!     let mut proxy = registry.open_for_read(&key.id("/notes/todo.txt")?).await?;
//!     let mut buf = [0u8; 64];
//!     let n = proxy.read(0, buf.len(), &mut buf).await?;
//!     assert_eq!(&buf[..n], b"buy milk\n");
//!     registry.release(&key).await
//! }
//! ```

pub mod archive;
pub mod cli;
pub mod config;
pub mod error;
pub mod id;
pub mod io;
pub mod loader;
pub mod mime;
pub mod registry;
pub mod tree;
pub mod zip;

pub use archive::{Archive, EntryWriter, RandomAccessProxy, ReadableArchive, WriteableArchive};
pub use config::ArchiveOptions;
pub use error::{Error, Result};
pub use id::{AccessMode, ArchiveId, ArchiveKey};
pub use io::{HttpRangeReader, LocalFileReader, MemoryReader, ReadAt};
pub use loader::{ArchiveEvent, ArchiveEventKind, ArchiveLoader, LoaderState};
pub use registry::ArchiveRegistry;
pub use tree::{Entry, EntryTree};
