//! Open archives and the document-tree operations they serve.
//!
//! An [`Archive`] is either a [`ReadableArchive`] (an existing ZIP, browsed and
//! extracted) or a [`WriteableArchive`] (a new ZIP being built). Both keep
//! their [`EntryTree`] behind one mutex so the path and child maps are always
//! observed together.

mod proxy;
mod readable;
mod streaming;
mod writeable;

pub use proxy::RandomAccessProxy;
pub use readable::ReadableArchive;
pub use streaming::EntryWriter;
pub use writeable::WriteableArchive;

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::ArchiveOptions;
use crate::error::{Error, Result};
use crate::id::{AccessMode, ArchiveId, ArchiveKey};
use crate::tree::{self, Entry, EntryTree};

/// Locks `mutex`, ignoring poisoning: a panic while holding one of these locks
/// cannot leave the guarded maps half-updated.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub enum Archive {
    Read(ReadableArchive),
    Write(WriteableArchive),
}

impl Archive {
    /// Opens the archive `key` names, in the mode it names.
    pub async fn open(key: &ArchiveKey, options: &ArchiveOptions) -> Result<Self> {
        match key.mode() {
            AccessMode::Read => Ok(Archive::Read(ReadableArchive::open(key.clone(), options).await?)),
            AccessMode::Write => Ok(Archive::Write(WriteableArchive::create(key.clone(), options).await?)),
        }
    }

    pub fn key(&self) -> &ArchiveKey {
        match self {
            Archive::Read(archive) => archive.key(),
            Archive::Write(archive) => archive.key(),
        }
    }

    fn tree(&self) -> &Mutex<EntryTree> {
        match self {
            Archive::Read(archive) => archive.tree(),
            Archive::Write(archive) => archive.tree(),
        }
    }

    fn check(&self, id: &ArchiveId) -> Result<()> {
        if id.key() != self.key() {
            return Err(Error::MismatchedArchive {
                id: id.key().to_string(),
                archive: self.key().to_string(),
            });
        }
        Ok(())
    }

    pub fn list_children(&self, id: &ArchiveId) -> Result<Vec<Entry>> {
        self.check(id)?;
        let tree = lock(self.tree());
        let children = tree
            .children(id.path())
            .ok_or_else(|| Error::not_found(format!("directory {}", id.path())))?;
        Ok(children.into_iter().cloned().collect())
    }

    pub fn stat(&self, id: &ArchiveId) -> Result<Entry> {
        self.check(id)?;
        lock(self.tree())
            .get(id.path())
            .cloned()
            .ok_or_else(|| Error::not_found(id.path()))
    }

    /// Whether `id` lies strictly below the directory `parent`.
    pub fn is_descendant(&self, parent: &ArchiveId, id: &ArchiveId) -> Result<bool> {
        self.check(parent)?;
        self.check(id)?;
        let tree = lock(self.tree());
        let parent_entry = tree
            .get(parent.path())
            .ok_or_else(|| Error::not_found(parent.path()))?;
        if !tree.contains(id.path()) {
            return Err(Error::not_found(id.path()));
        }
        Ok(parent_entry.is_directory && tree::is_descendant(parent.path(), id.path()))
    }

    pub fn mime_type(&self, id: &ArchiveId) -> Result<String> {
        Ok(self.stat(id)?.mime_type)
    }

    pub async fn open_for_read(&self, id: &ArchiveId) -> Result<RandomAccessProxy> {
        self.check(id)?;
        match self {
            Archive::Read(archive) => archive.open_for_read(id.path()).await,
            Archive::Write(_) => Err(Error::not_supported("reading from a write-mode archive")),
        }
    }

    pub async fn open_thumbnail(&self, id: &ArchiveId) -> Result<RandomAccessProxy> {
        self.check(id)?;
        match self {
            Archive::Read(archive) => archive.open_thumbnail(id.path()).await,
            Archive::Write(_) => Err(Error::not_supported("thumbnails of a write-mode archive")),
        }
    }

    /// Creates `name` inside the directory `parent`, returning the new id.
    pub fn create_entry(&self, parent: &ArchiveId, mime_type: &str, name: &str) -> Result<ArchiveId> {
        self.check(parent)?;
        match self {
            Archive::Read(_) => Err(Error::not_supported("creating entries in a read-mode archive")),
            Archive::Write(archive) => {
                let entry = archive.create_entry(parent.path(), mime_type, name)?;
                parent.with_path(entry.path)
            }
        }
    }

    pub fn open_for_write(&self, id: &ArchiveId) -> Result<EntryWriter> {
        self.check(id)?;
        match self {
            Archive::Read(_) => Err(Error::not_supported("writing to a read-mode archive")),
            Archive::Write(archive) => archive.open_for_write(id.clone()),
        }
    }

    /// Releases the archive's resources. Safe to call more than once; errors
    /// are logged, not returned.
    pub async fn close(&self) {
        match self {
            Archive::Read(archive) => archive.close(),
            Archive::Write(archive) => archive.close().await,
        }
    }
}
