use std::sync::{Arc, Mutex};
use tracing::debug;

use super::lock;
use super::proxy::RandomAccessProxy;
use crate::config::ArchiveOptions;
use crate::error::{Error, Result};
use crate::id::ArchiveKey;
use crate::io::{self, ReadAt};
use crate::mime;
use crate::tree::EntryTree;
use crate::zip::ZipParser;

/// An existing archive opened for browsing and extraction.
///
/// The whole central directory is indexed once, at open; afterwards the tree
/// never changes.
pub struct ReadableArchive {
    key: ArchiveKey,
    tree: Mutex<EntryTree>,
    reader: Mutex<Option<Arc<dyn ReadAt>>>,
    chunk_size: usize,
}

impl ReadableArchive {
    pub async fn open(key: ArchiveKey, options: &ArchiveOptions) -> Result<Self> {
        let reader = io::open_source(key.source(), options).await?;
        Self::from_reader(key, reader, options).await
    }

    /// Indexes an archive from an already open source.
    pub async fn from_reader(
        key: ArchiveKey,
        reader: Arc<dyn ReadAt>,
        options: &ArchiveOptions,
    ) -> Result<Self> {
        let records = ZipParser::new(reader.clone()).read_central_directory().await?;
        let record_count = records.len();
        let tree = EntryTree::build(records)?;
        debug!(%key, records = record_count, entries = tree.len(), "indexed archive");

        Ok(Self {
            key,
            tree: Mutex::new(tree),
            reader: Mutex::new(Some(reader)),
            chunk_size: options.chunk_size,
        })
    }

    pub fn key(&self) -> &ArchiveKey {
        &self.key
    }

    pub(super) fn tree(&self) -> &Mutex<EntryTree> {
        &self.tree
    }

    pub async fn open_for_read(&self, path: &str) -> Result<RandomAccessProxy> {
        let entry = lock(&self.tree)
            .get(path)
            .cloned()
            .ok_or_else(|| Error::not_found(path))?;
        if entry.is_directory {
            return Err(Error::not_supported(format!("{path} is a directory")));
        }
        let Some(record) = entry.record().cloned() else {
            return Err(Error::not_found(path));
        };
        let reader = lock(&self.reader).clone().ok_or(Error::Closed)?;
        RandomAccessProxy::open(reader, record, self.chunk_size).await
    }

    /// Opens an image entry for thumbnail decoding.
    pub async fn open_thumbnail(&self, path: &str) -> Result<RandomAccessProxy> {
        let mime_type = lock(&self.tree)
            .get(path)
            .map(|e| e.mime_type.clone())
            .ok_or_else(|| Error::not_found(path))?;
        if !mime::is_image(&mime_type) {
            return Err(Error::not_supported(format!("no thumbnail for {mime_type}")));
        }
        self.open_for_read(path).await
    }

    /// Drops the archive's handle on its source. Proxies already handed out
    /// keep their own handle until released.
    pub fn close(&self) {
        if lock(&self.reader).take().is_some() {
            debug!(key = %self.key, "closed readable archive");
        }
    }
}
