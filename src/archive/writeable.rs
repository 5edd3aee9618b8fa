use std::sync::{Arc, Mutex};
use tokio::io::BufWriter;
use tracing::{debug, warn};

use super::lock;
use super::streaming::{EntryWriter, StreamingWriter};
use crate::config::ArchiveOptions;
use crate::error::{Error, Result};
use crate::id::{ArchiveId, ArchiveKey};
use crate::io;
use crate::tree::{Entry, EntryTree};
use crate::zip::ZipSink;

#[derive(Default)]
struct WriteState {
    /// Files created but not yet opened for writing.
    pending: Vec<String>,
    closing: bool,
}

/// A new archive being built.
///
/// Entries are created first and given content afterwards. Directories go to
/// the output as soon as they are created; a file waits until it is opened
/// for writing, or until close, when it is stored empty.
pub struct WriteableArchive {
    key: ArchiveKey,
    tree: Arc<Mutex<EntryTree>>,
    state: Mutex<WriteState>,
    writer: StreamingWriter,
}

impl WriteableArchive {
    /// Creates (or truncates) the destination file.
    pub async fn create(key: ArchiveKey, options: &ArchiveOptions) -> Result<Self> {
        if io::is_http_url(key.source()) {
            return Err(Error::not_supported("write mode needs a local destination"));
        }
        let file = tokio::fs::File::create(io::local_path(key.source())).await?;
        let sink = ZipSink::new(BufWriter::new(file), options.compression_level);
        debug!(%key, "created write-mode archive");

        let tree = Arc::new(Mutex::new(EntryTree::new()));
        let writer = StreamingWriter::spawn(sink, tree.clone(), options.pipe_capacity);
        Ok(Self {
            key,
            tree,
            state: Mutex::new(WriteState::default()),
            writer,
        })
    }

    pub fn key(&self) -> &ArchiveKey {
        &self.key
    }

    pub(super) fn tree(&self) -> &Mutex<EntryTree> {
        &self.tree
    }

    pub fn create_entry(&self, parent: &str, mime_type: &str, name: &str) -> Result<Entry> {
        let mut state = lock(&self.state);
        if state.closing {
            return Err(Error::Closed);
        }
        let entry = lock(&self.tree).add(parent, name, mime_type)?;
        if entry.is_directory {
            self.writer.write_directory(&entry.path)?;
        } else {
            state.pending.push(entry.path.clone());
        }
        Ok(entry)
    }

    /// Opens a pending file for its one and only write.
    pub fn open_for_write(&self, id: ArchiveId) -> Result<EntryWriter> {
        let mut state = lock(&self.state);
        if state.closing {
            return Err(Error::Closed);
        }
        let Some(index) = state.pending.iter().position(|p| p == id.path()) else {
            // Directories are never pending.
            return Err(if lock(&self.tree).contains(id.path()) {
                Error::AlreadyWritten(id.path().to_string())
            } else {
                Error::not_found(id.path())
            });
        };
        let writer = self.writer.open_entry(id)?;
        state.pending.swap_remove(index);
        Ok(writer)
    }

    /// Waits for queued writes, stores never-written files as empty and
    /// completes the output. Later calls do nothing.
    pub async fn close(&self) {
        let pending = {
            let mut state = lock(&self.state);
            if state.closing {
                return;
            }
            state.closing = true;
            std::mem::take(&mut state.pending)
        };
        match self.writer.finish(pending).await {
            Ok(()) => debug!(key = %self.key, "closed write-mode archive"),
            Err(e) => warn!(key = %self.key, "closing write-mode archive failed: {e}"),
        }
    }
}
