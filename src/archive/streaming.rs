//! The background writer of a write-mode archive.
//!
//! One task owns the [`ZipSink`] and runs jobs strictly in the order they were
//! queued. A file job drains its pipe until the client closes it, so a second
//! file opened meanwhile waits (its pipe filling up) until the first is done.

use std::io;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::lock;
use crate::error::{Error, Result};
use crate::id::ArchiveId;
use crate::tree::EntryTree;
use crate::zip::ZipSink;

enum Job {
    Directory {
        path: String,
    },
    File {
        path: String,
        data: mpsc::Receiver<Vec<u8>>,
        cancel: CancellationToken,
        done: oneshot::Sender<Result<u64>>,
    },
    Finish {
        pending: Vec<String>,
        done: oneshot::Sender<Result<()>>,
    },
}

pub struct StreamingWriter {
    jobs: mpsc::UnboundedSender<Job>,
    worker: Mutex<Option<JoinHandle<()>>>,
    pipe_capacity: usize,
}

impl StreamingWriter {
    /// Starts the writer task. Written file sizes are recorded in `tree`.
    pub fn spawn<W>(sink: ZipSink<W>, tree: Arc<Mutex<EntryTree>>, pipe_capacity: usize) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (jobs, queue) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run(sink, queue, tree));
        Self {
            jobs,
            worker: Mutex::new(Some(worker)),
            pipe_capacity: pipe_capacity.max(1),
        }
    }

    /// Queues an empty directory record. Does not wait for it to be written.
    pub fn write_directory(&self, path: &str) -> Result<()> {
        self.jobs
            .send(Job::Directory {
                path: path.to_string(),
            })
            .map_err(|_| Error::Closed)
    }

    /// Queues a file job and returns the client end of its pipe.
    pub fn open_entry(&self, id: ArchiveId) -> Result<EntryWriter> {
        let (pipe, data) = mpsc::channel(self.pipe_capacity);
        let (done, outcome) = oneshot::channel();
        let cancel = CancellationToken::new();
        self.jobs
            .send(Job::File {
                path: id.path().to_string(),
                data,
                cancel: cancel.clone(),
                done,
            })
            .map_err(|_| Error::Closed)?;
        Ok(EntryWriter {
            id,
            pipe: Some(pipe),
            outcome: Some(outcome),
            cancel,
        })
    }

    /// Waits for every queued job, writes `pending` as empty files, and
    /// completes the archive.
    pub async fn finish(&self, pending: Vec<String>) -> Result<()> {
        let (done, finished) = oneshot::channel();
        self.jobs
            .send(Job::Finish { pending, done })
            .map_err(|_| Error::Closed)?;
        let result = finished.await.unwrap_or(Err(Error::Closed));

        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            worker
                .await
                .map_err(|e| Error::Io(io::Error::other(e)))?;
        }
        result
    }
}

async fn run<W>(mut sink: ZipSink<W>, mut queue: mpsc::UnboundedReceiver<Job>, tree: Arc<Mutex<EntryTree>>)
where
    W: AsyncWrite + Unpin + Send,
{
    // First sink failure; the output is unusable after it.
    let mut failure: Option<String> = None;

    while let Some(job) = queue.recv().await {
        match job {
            Job::Directory { path } => {
                if failure.is_some() {
                    continue;
                }
                if let Err(e) = sink.add_directory(zip_name(&path)).await {
                    warn!(path = %path, "writing directory record failed: {e}");
                    failure = Some(e.to_string());
                }
            }
            Job::File {
                path,
                data,
                cancel,
                done,
            } => {
                let (stored, result) = match &failure {
                    Some(cause) => (None, Err(poisoned(cause))),
                    None => copy_entry(&mut sink, &path, data, &cancel).await,
                };
                if let Some(size) = stored {
                    lock(&tree).set_size(&path, size);
                }
                match &result {
                    Ok(size) => debug!(path = %path, size, "entry written"),
                    Err(Error::Cancelled) => debug!(path = %path, "entry write cancelled"),
                    Err(e) => {
                        warn!(path = %path, "entry write failed: {e}");
                        failure.get_or_insert_with(|| e.to_string());
                    }
                }
                let _ = done.send(result);
            }
            Job::Finish { pending, done } => {
                let result = match failure {
                    Some(cause) => Err(poisoned(&cause)),
                    None => complete(sink, pending).await,
                };
                let _ = done.send(result);
                return;
            }
        }
    }

    warn!("write-mode archive dropped without close; output is incomplete");
}

/// Streams one pipe into a file record. The record is closed even when the
/// copy is cancelled, so the archive stays readable.
///
/// Returns the size stored in the closed record, if it was closed, alongside
/// the outcome reported to the writer. A cancelled copy keeps the bytes that
/// arrived before the cancel.
async fn copy_entry<W>(
    sink: &mut ZipSink<W>,
    path: &str,
    mut data: mpsc::Receiver<Vec<u8>>,
    cancel: &CancellationToken,
) -> (Option<u64>, Result<u64>)
where
    W: AsyncWrite + Unpin + Send,
{
    if let Err(e) = sink.start_file(zip_name(path)).await {
        return (None, Err(e));
    }

    let copied = loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Err(Error::Cancelled),
            chunk = data.recv() => chunk,
        };
        match chunk {
            Some(bytes) => {
                if let Err(e) = sink.write_data(&bytes).await {
                    break Err(e);
                }
            }
            None => break Ok(()),
        }
    };
    // Pending and future sends now fail, which tells the client to collect
    // the outcome.
    data.close();

    match sink.finish_file().await {
        Ok(size) => (Some(size), copied.map(|()| size)),
        Err(e) => (None, Err(copied.err().unwrap_or(e))),
    }
}

async fn complete<W>(sink: ZipSink<W>, pending: Vec<String>) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut sink = sink;
    for path in &pending {
        debug!(path = %path, "flushing unwritten entry as empty");
        if let Err(e) = sink.start_file(zip_name(path)).await {
            return Err(e);
        }
        sink.finish_file().await?;
    }
    let entries = sink.entry_count();
    let mut out = sink.finish().await?;
    out.shutdown().await?;
    debug!(entries, "archive completed");
    Ok(())
}

fn zip_name(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

fn poisoned(cause: &str) -> Error {
    Error::Io(io::Error::other(format!("archive output failed earlier: {cause}")))
}

/// Client end of one entry's content pipe.
///
/// Bytes written here are compressed into the archive by the background
/// writer. [`finish`](Self::finish) ends the entry and reports the outcome;
/// dropping the writer ends the entry too, without reporting.
pub struct EntryWriter {
    id: ArchiveId,
    pipe: Option<mpsc::Sender<Vec<u8>>>,
    outcome: Option<oneshot::Receiver<Result<u64>>>,
    cancel: CancellationToken,
}

impl EntryWriter {
    pub fn id(&self) -> &ArchiveId {
        &self.id
    }

    /// Sends `data` down the pipe, waiting while the pipe is full.
    ///
    /// If the background writer gave up on this entry, its error is returned.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        if self.cancel.is_cancelled() {
            self.pipe = None;
            return Err(Error::Cancelled);
        }
        let Some(pipe) = &self.pipe else {
            return Err(Error::Closed);
        };
        let sent = tokio::select! {
            sent = pipe.send(data.to_vec()) => Some(sent.is_ok()),
            _ = self.cancel.cancelled() => None,
        };
        match sent {
            Some(true) => Ok(()),
            Some(false) => {
                self.pipe = None;
                Err(self.outcome().await.err().unwrap_or(Error::Closed))
            }
            None => {
                self.pipe = None;
                Err(Error::Cancelled)
            }
        }
    }

    /// Copies `input` to end of stream in `chunk_size` pieces.
    pub async fn write_from<R: AsyncRead + Unpin>(&mut self, mut input: R, chunk_size: usize) -> Result<u64> {
        let mut buf = vec![0u8; chunk_size.max(1)];
        let mut copied = 0;
        loop {
            let n = input.read(&mut buf).await?;
            if n == 0 {
                return Ok(copied);
            }
            self.write(&buf[..n]).await?;
            copied += n as u64;
        }
    }

    /// Ends the entry and waits until it is in the archive, returning its size.
    pub async fn finish(mut self) -> Result<u64> {
        self.pipe = None;
        self.outcome().await
    }

    /// Asks the background writer to abandon this entry.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    async fn outcome(&mut self) -> Result<u64> {
        match self.outcome.take() {
            Some(outcome) => outcome.await.unwrap_or(Err(Error::Closed)),
            None => Err(Error::Closed),
        }
    }
}
