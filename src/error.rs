//! Error types for archive document-tree operations.
//!
//! Every fallible operation in the library returns [`Result<T>`]. The variants
//! mirror the ways a request against an archive can go wrong: the archive
//! itself is broken, the caller addressed something that does not exist, a
//! write precondition was violated, or the underlying storage failed.
//!
//! ```rust,no_run
//! use zipdocs::{AccessMode, ArchiveKey, ArchiveRegistry, Error};
//!
//! # async fn run() -> zipdocs::Result<()> {
//! let registry = ArchiveRegistry::default();
//! let key = ArchiveKey::new("photos.zip", AccessMode::Read)?;
//! registry.acquire(&key);
//!
//! match registry.stat(&key.id("/missing.jpg")?).await {
//!     Err(Error::NotFound(path)) => eprintln!("no such entry: {path}"),
//!     Err(Error::OpenFailed(cause)) => eprintln!("archive unusable: {cause}"),
//!     other => println!("{other:?}"),
//! }
//!
//! registry.release(&key).await
//! # }
//! ```

use std::io;
use std::sync::Arc;

/// Errors produced while opening, browsing or writing an archive.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An archive id token could not be parsed, or its fields are invalid.
    #[error("malformed archive id: {0}")]
    MalformedId(String),

    /// The central directory or entry data is corrupt or inconsistent.
    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    /// No entry (or no acquired archive) exists for the given path or key.
    #[error("not found: {0}")]
    NotFound(String),

    /// An entry with the requested path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The entry is not waiting for content; each new file is written once.
    #[error("entry already written: {0}")]
    AlreadyWritten(String),

    /// A display name is empty, contains a separator, or is `.`/`..`.
    #[error("invalid name: {0:?}")]
    InvalidName(String),

    /// An id addressed an archive other than the one it was used against.
    #[error("id belongs to archive {id}, not {archive}")]
    MismatchedArchive {
        /// Key serialized from the id.
        id: String,
        /// Key of the archive the request reached.
        archive: String,
    },

    /// The operation is not available for this archive or entry.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// A cooperative cancellation signal was observed.
    #[error("operation cancelled")]
    Cancelled,

    /// The archive has been closed, or is closing.
    #[error("archive is closed")]
    Closed,

    /// The archive failed to open. Every waiter on the same loader sees the
    /// same cause.
    #[error("archive failed to open: {0}")]
    OpenFailed(Arc<Error>),

    /// Underlying storage failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Transport failure talking to a remote source.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the error that caused an open failure, or `self`.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::OpenFailed(cause) => cause.root_cause(),
            other => other,
        }
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedArchive(msg.into())
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub(crate) fn not_supported(what: impl Into<String>) -> Self {
        Error::NotSupported(what.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_cause_unwraps_nested_open_failures() {
        let inner = Error::malformed("bad central directory");
        let outer = Error::OpenFailed(Arc::new(Error::OpenFailed(Arc::new(inner))));
        assert!(matches!(outer.root_cause(), Error::MalformedArchive(_)));
    }

    #[test]
    fn display_includes_context() {
        let err = Error::MismatchedArchive {
            id: "a.zip#0".into(),
            archive: "b.zip#0".into(),
        };
        assert_eq!(err.to_string(), "id belongs to archive a.zip#0, not b.zip#0");
        assert_eq!(Error::InvalidName("..".into()).to_string(), "invalid name: \"..\"");
    }
}
