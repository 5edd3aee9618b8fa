//! Lazy, reference-counted opening of one archive.
//!
//! A loader starts opening its archive in the background as soon as it is
//! created, and hands the same [`Archive`] to every holder once it is ready.
//! The reference count alone decides when the archive is closed: the release
//! that brings it to zero closes it, or, if the open has not finished yet,
//! leaves the closing to the open task.

use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use crate::archive::{Archive, lock};
use crate::config::ArchiveOptions;
use crate::error::{Error, Result};
use crate::id::ArchiveKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    Opening,
    Opened,
    Failed,
    Closing,
    Closed,
}

/// Pushed to registry subscribers when an archive that is still wanted
/// finishes opening.
#[derive(Debug, Clone)]
pub struct ArchiveEvent {
    pub key: ArchiveKey,
    pub kind: ArchiveEventKind,
}

#[derive(Debug, Clone)]
pub enum ArchiveEventKind {
    Ready,
    Failed(Arc<Error>),
}

struct Inner {
    ref_count: u32,
    archive: Option<Arc<Archive>>,
    error: Option<Arc<Error>>,
}

/// Outcome of dropping one reference.
pub(crate) enum Release {
    /// Other holders remain.
    Shared,
    /// That was the last reference. Carries the archive the caller must close,
    /// if it was open.
    Last(Option<Arc<Archive>>),
}

pub struct ArchiveLoader {
    key: ArchiveKey,
    inner: Mutex<Inner>,
    state: watch::Sender<LoaderState>,
}

impl ArchiveLoader {
    /// Creates a loader holding one reference and starts opening `key`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        key: ArchiveKey,
        options: ArchiveOptions,
        events: broadcast::Sender<ArchiveEvent>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(LoaderState::Opening);
        let loader = Arc::new(Self {
            key,
            inner: Mutex::new(Inner {
                ref_count: 1,
                archive: None,
                error: None,
            }),
            state,
        });

        let task = loader.clone();
        tokio::spawn(async move {
            debug!(key = %task.key, "opening archive");
            let result = Archive::open(&task.key, &options).await;
            task.settle(result, &events).await;
        });
        loader
    }

    pub fn key(&self) -> &ArchiveKey {
        &self.key
    }

    pub fn state(&self) -> LoaderState {
        *self.state.borrow()
    }

    /// A receiver that observes every state transition.
    pub fn watch(&self) -> watch::Receiver<LoaderState> {
        self.state.subscribe()
    }

    pub fn ref_count(&self) -> u32 {
        lock(&self.inner).ref_count
    }

    pub fn acquire(&self) {
        lock(&self.inner).ref_count += 1;
    }

    pub(crate) fn release(&self) -> Release {
        let mut inner = lock(&self.inner);
        inner.ref_count = inner.ref_count.saturating_sub(1);
        if inner.ref_count > 0 {
            return Release::Shared;
        }
        match self.state() {
            LoaderState::Opened => {
                self.state.send_replace(LoaderState::Closing);
                Release::Last(inner.archive.take())
            }
            LoaderState::Failed => {
                self.state.send_replace(LoaderState::Closed);
                Release::Last(None)
            }
            // The open task sees the zero count when it settles.
            LoaderState::Opening | LoaderState::Closing | LoaderState::Closed => Release::Last(None),
        }
    }

    /// Closes an archive handed back by the last [`release`](Self::release).
    pub(crate) async fn close(&self, archive: Arc<Archive>) {
        archive.close().await;
        debug!(key = %self.key, "archive closed");
        self.state.send_replace(LoaderState::Closed);
    }

    /// Waits until the open has finished and returns the archive.
    pub async fn archive(&self) -> Result<Arc<Archive>> {
        self.watch()
            .wait_for(|state| *state != LoaderState::Opening)
            .await
            .map_err(|_| Error::Closed)?;

        let inner = lock(&self.inner);
        if let Some(archive) = &inner.archive {
            return Ok(archive.clone());
        }
        match &inner.error {
            Some(cause) => Err(Error::OpenFailed(cause.clone())),
            None => Err(Error::Closed),
        }
    }

    async fn settle(&self, result: Result<Archive>, events: &broadcast::Sender<ArchiveEvent>) {
        let (unwanted, event) = {
            let mut inner = lock(&self.inner);
            let wanted = inner.ref_count > 0;
            match result {
                Ok(archive) if wanted => {
                    inner.archive = Some(Arc::new(archive));
                    self.state.send_replace(LoaderState::Opened);
                    debug!(key = %self.key, "archive opened");
                    (None, Some(ArchiveEventKind::Ready))
                }
                Ok(archive) => {
                    self.state.send_replace(LoaderState::Closing);
                    (Some(archive), None)
                }
                Err(e) if wanted => {
                    warn!(key = %self.key, "opening archive failed: {e}");
                    let cause = Arc::new(e);
                    inner.error = Some(cause.clone());
                    self.state.send_replace(LoaderState::Failed);
                    (None, Some(ArchiveEventKind::Failed(cause)))
                }
                Err(e) => {
                    debug!(key = %self.key, "unwanted archive failed to open: {e}");
                    self.state.send_replace(LoaderState::Closed);
                    (None, None)
                }
            }
        };

        if let Some(kind) = event {
            // No subscribers is fine.
            let _ = events.send(ArchiveEvent {
                key: self.key.clone(),
                kind,
            });
        }
        if let Some(archive) = unwanted {
            debug!(key = %self.key, "released while opening; closing");
            self.close(Arc::new(archive)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::AccessMode;
    use crate::zip::ZipSink;

    async fn fixture(dir: &tempfile::TempDir) -> ArchiveKey {
        let mut sink = ZipSink::new(Vec::new(), 6);
        sink.add_directory("docs/").await.unwrap();
        sink.start_file("docs/readme.txt").await.unwrap();
        sink.write_data(b"hello").await.unwrap();
        sink.finish_file().await.unwrap();
        let bytes = sink.finish().await.unwrap();

        let path = dir.path().join("fixture.zip");
        std::fs::write(&path, bytes).unwrap();
        ArchiveKey::new(path.to_string_lossy(), AccessMode::Read).unwrap()
    }

    async fn settled(loader: &ArchiveLoader, target: LoaderState) {
        loader.watch().wait_for(|s| *s == target).await.unwrap();
    }

    #[tokio::test]
    async fn opens_and_announces_once() {
        let dir = tempfile::tempdir().unwrap();
        let key = fixture(&dir).await;
        let (events, mut rx) = broadcast::channel(4);

        let loader = ArchiveLoader::spawn(key.clone(), ArchiveOptions::default(), events);
        let archive = loader.archive().await.unwrap();
        assert_eq!(loader.state(), LoaderState::Opened);
        assert_eq!(archive.stat(&key.id("/docs/readme.txt").unwrap()).unwrap().size, 5);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.key, key);
        assert!(matches!(event.kind, ArchiveEventKind::Ready));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn last_release_hands_back_the_archive() {
        let dir = tempfile::tempdir().unwrap();
        let key = fixture(&dir).await;
        let (events, _rx) = broadcast::channel(4);

        let loader = ArchiveLoader::spawn(key, ArchiveOptions::default(), events);
        loader.acquire();
        assert_eq!(loader.ref_count(), 2);
        loader.archive().await.unwrap();

        assert!(matches!(loader.release(), Release::Shared));
        assert_eq!(loader.state(), LoaderState::Opened);
        let Release::Last(Some(archive)) = loader.release() else {
            panic!("expected the open archive back");
        };
        assert_eq!(loader.state(), LoaderState::Closing);
        loader.close(archive).await;
        assert_eq!(loader.state(), LoaderState::Closed);
        assert!(matches!(loader.archive().await, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn release_while_opening_closes_silently() {
        let dir = tempfile::tempdir().unwrap();
        let key = fixture(&dir).await;
        let (events, mut rx) = broadcast::channel(4);

        // The open task cannot run before this test yields.
        let loader = ArchiveLoader::spawn(key, ArchiveOptions::default(), events);
        assert!(matches!(loader.release(), Release::Last(None)));
        assert_eq!(loader.state(), LoaderState::Opening);

        settled(&loader, LoaderState::Closed).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn failure_is_shared_by_every_waiter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.zip");
        std::fs::write(&path, b"this is not a zip file at all").unwrap();
        let key = ArchiveKey::new(path.to_string_lossy(), AccessMode::Read).unwrap();
        let (events, mut rx) = broadcast::channel(4);

        let loader = ArchiveLoader::spawn(key, ArchiveOptions::default(), events);
        let first = loader.archive().await.err().unwrap();
        let second = loader.archive().await.err().unwrap();
        assert!(matches!(first.root_cause(), Error::MalformedArchive(_)));
        assert!(matches!(second, Error::OpenFailed(_)));
        assert_eq!(loader.state(), LoaderState::Failed);

        let event = rx.recv().await.unwrap();
        assert!(matches!(event.kind, ArchiveEventKind::Failed(_)));

        assert!(matches!(loader.release(), Release::Last(None)));
        assert_eq!(loader.state(), LoaderState::Closed);
    }
}
