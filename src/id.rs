//! Addressing of archives and of entries inside them.
//!
//! An [`ArchiveId`] travels through the document-provider boundary as a flat
//! token: `<source>#<mode>#<path>`. The source may not contain `#`; the path
//! may, since it is always the last field.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Field delimiter of the serialized id.
pub const DELIMITER: char = '#';

/// How an archive is opened. One source may be open in both modes at once;
/// they are independent archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    Read,
    Write,
}

impl AccessMode {
    pub fn as_u8(self) -> u8 {
        match self {
            AccessMode::Read => 0,
            AccessMode::Write => 1,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(AccessMode::Read),
            1 => Some(AccessMode::Write),
            _ => None,
        }
    }
}

/// The sharing key: which archive instance a request is served by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveKey {
    source: String,
    mode: AccessMode,
}

impl ArchiveKey {
    /// Creates a key, rejecting empty sources and sources containing the
    /// id delimiter.
    pub fn new(source: impl Into<String>, mode: AccessMode) -> Result<Self> {
        let source = source.into();
        if source.is_empty() {
            return Err(Error::MalformedId("empty source".into()));
        }
        if source.contains(DELIMITER) {
            return Err(Error::MalformedId(format!(
                "source {source:?} contains '{DELIMITER}'"
            )));
        }
        Ok(Self { source, mode })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Addresses `path` inside this archive.
    pub fn id(&self, path: impl Into<String>) -> Result<ArchiveId> {
        ArchiveId::new(self.clone(), path)
    }

    /// Addresses the root directory of this archive.
    pub fn root(&self) -> ArchiveId {
        ArchiveId {
            key: self.clone(),
            path: "/".to_string(),
        }
    }
}

impl fmt::Display for ArchiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{DELIMITER}{}", self.source, self.mode.as_u8())
    }
}

/// One entry inside one archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveId {
    key: ArchiveKey,
    path: String,
}

impl ArchiveId {
    /// Creates an id. The path must be absolute (start with `/`).
    pub fn new(key: ArchiveKey, path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        if !path.starts_with('/') {
            return Err(Error::MalformedId(format!("path {path:?} is not absolute")));
        }
        Ok(Self { key, path })
    }

    pub fn key(&self) -> &ArchiveKey {
        &self.key
    }

    pub fn source(&self) -> &str {
        self.key.source()
    }

    pub fn mode(&self) -> AccessMode {
        self.key.mode()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Same archive, different path.
    pub fn with_path(&self, path: impl Into<String>) -> Result<Self> {
        ArchiveId::new(self.key.clone(), path)
    }

    /// Flattens the id into its token form.
    pub fn serialize(&self) -> String {
        self.to_string()
    }

    /// Parses a token produced by [`serialize`](Self::serialize).
    pub fn parse(token: &str) -> Result<Self> {
        let mut fields = token.splitn(3, DELIMITER);
        let source = fields.next().unwrap_or_default();
        let (Some(mode), Some(path)) = (fields.next(), fields.next()) else {
            return Err(Error::MalformedId(format!("{token:?} is missing a delimiter")));
        };
        let mode = mode
            .parse::<u8>()
            .ok()
            .and_then(AccessMode::from_u8)
            .ok_or_else(|| Error::MalformedId(format!("unknown access mode {mode:?}")))?;
        ArchiveId::new(ArchiveKey::new(source, mode)?, path)
    }
}

impl fmt::Display for ArchiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{DELIMITER}{}", self.key, self.path)
    }
}

impl FromStr for ArchiveId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ArchiveId::parse(s)
    }
}
