//! The acquire/release boundary a document-provider shell calls through.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::debug;

use crate::archive::{Archive, EntryWriter, RandomAccessProxy, lock};
use crate::config::ArchiveOptions;
use crate::error::{Error, Result};
use crate::id::{ArchiveId, ArchiveKey};
use crate::loader::{ArchiveEvent, ArchiveLoader, LoaderState, Release};
use crate::tree::Entry;

const EVENT_CAPACITY: usize = 64;

/// Table of loaders, one per acquired [`ArchiveKey`].
///
/// Every tree operation is addressed by an [`ArchiveId`] whose key must be
/// acquired; it waits for that archive to finish opening before it runs.
///
/// ```no_run
/// use zipdocs::{AccessMode, ArchiveKey, ArchiveRegistry};
///
/// # async fn run() -> zipdocs::Result<()> {
/// let registry = ArchiveRegistry::default();
/// let key = ArchiveKey::new("/tmp/photos.zip", AccessMode::Read)?;
///
/// registry.acquire(&key);
/// for entry in registry.list_children(&key.root()).await? {
///     println!("{} {}", entry.path, entry.size);
/// }
/// registry.release(&key).await?;
/// # Ok(())
/// # }
/// ```
pub struct ArchiveRegistry {
    loaders: Mutex<HashMap<ArchiveKey, Arc<ArchiveLoader>>>,
    options: ArchiveOptions,
    events: broadcast::Sender<ArchiveEvent>,
}

impl Default for ArchiveRegistry {
    fn default() -> Self {
        Self::new(ArchiveOptions::default())
    }
}

impl ArchiveRegistry {
    pub fn new(options: ArchiveOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            loaders: Mutex::new(HashMap::new()),
            options,
            events,
        }
    }

    pub fn options(&self) -> &ArchiveOptions {
        &self.options
    }

    /// Receives an event each time an acquired archive becomes ready or
    /// fails to open.
    pub fn subscribe(&self) -> broadcast::Receiver<ArchiveEvent> {
        self.events.subscribe()
    }

    /// Takes a reference on `key`, starting to open it if nobody holds one.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn acquire(&self, key: &ArchiveKey) {
        let mut loaders = lock(&self.loaders);
        match loaders.get(key) {
            Some(loader) => loader.acquire(),
            None => {
                debug!(%key, "first acquisition");
                let loader = ArchiveLoader::spawn(key.clone(), self.options.clone(), self.events.clone());
                loaders.insert(key.clone(), loader);
            }
        }
    }

    /// Drops a reference on `key`. The last release closes the archive and
    /// forgets the loader, so a later acquisition opens it afresh.
    pub async fn release(&self, key: &ArchiveKey) -> Result<()> {
        let closing = {
            let mut loaders = lock(&self.loaders);
            let loader = loaders
                .get(key)
                .cloned()
                .ok_or_else(|| Error::not_found(format!("archive {key}")))?;
            match loader.release() {
                Release::Shared => return Ok(()),
                Release::Last(archive) => {
                    loaders.remove(key);
                    debug!(%key, "last release");
                    archive.map(|archive| (loader, archive))
                }
            }
        };

        if let Some((loader, archive)) = closing {
            loader.close(archive).await;
        }
        Ok(())
    }

    /// State of the loader for `key`, `None` when it is not acquired.
    pub fn state(&self, key: &ArchiveKey) -> Option<LoaderState> {
        lock(&self.loaders).get(key).map(|loader| loader.state())
    }

    /// Waits for the archive `key` names to settle and returns it.
    pub async fn archive(&self, key: &ArchiveKey) -> Result<Arc<Archive>> {
        let loader = lock(&self.loaders)
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("archive {key} is not acquired")))?;
        loader.archive().await
    }

    pub async fn list_children(&self, id: &ArchiveId) -> Result<Vec<Entry>> {
        self.archive(id.key()).await?.list_children(id)
    }

    pub async fn stat(&self, id: &ArchiveId) -> Result<Entry> {
        self.archive(id.key()).await?.stat(id)
    }

    pub async fn is_descendant(&self, parent: &ArchiveId, id: &ArchiveId) -> Result<bool> {
        self.archive(parent.key()).await?.is_descendant(parent, id)
    }

    pub async fn create_entry(&self, parent: &ArchiveId, mime_type: &str, name: &str) -> Result<ArchiveId> {
        self.archive(parent.key()).await?.create_entry(parent, mime_type, name)
    }

    pub async fn open_for_read(&self, id: &ArchiveId) -> Result<RandomAccessProxy> {
        self.archive(id.key()).await?.open_for_read(id).await
    }

    pub async fn open_for_write(&self, id: &ArchiveId) -> Result<EntryWriter> {
        self.archive(id.key()).await?.open_for_write(id)
    }

    pub async fn open_thumbnail(&self, id: &ArchiveId) -> Result<RandomAccessProxy> {
        self.archive(id.key()).await?.open_thumbnail(id).await
    }
}
