//! The in-memory index of an archive: path → entry, directory → children.
//!
//! Paths are absolute. Directory paths end with `/`, file paths do not, and the
//! root is `/`. Every entry except the root has its parent directory in the
//! tree; directories an archive never recorded are synthesized while the tree
//! is built.

use chrono::NaiveDateTime;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::mime;
use crate::zip::ZipFileEntry;

pub const ROOT: &str = "/";

/// One file or directory of an archive.
#[derive(Debug, Clone)]
pub struct Entry {
    pub path: String,
    pub is_directory: bool,
    /// Uncompressed size; zero for directories.
    pub size: u64,
    pub compressed_size: u64,
    pub mime_type: String,
    pub last_modified: Option<NaiveDateTime>,
    record: Option<ZipFileEntry>,
}

impl Entry {
    /// A directory with no backing record.
    pub fn directory(path: &str) -> Self {
        Self {
            path: path.to_string(),
            is_directory: true,
            size: 0,
            compressed_size: 0,
            mime_type: mime::DIRECTORY.to_string(),
            last_modified: None,
            record: None,
        }
    }

    /// An entry created in write mode; content and size come later.
    pub fn created(path: String, is_directory: bool, mime_type: &str) -> Self {
        Self {
            path,
            is_directory,
            size: 0,
            compressed_size: 0,
            mime_type: mime_type.to_string(),
            last_modified: Some(chrono::Local::now().naive_local()),
            record: None,
        }
    }

    /// Builds an entry from a central directory record, validating its name.
    pub fn from_record(record: ZipFileEntry) -> Result<Self> {
        let path = normalize(&record.file_name)?;
        let is_directory = record.is_directory;
        if let Some(flagged_directory) = record.attribute_kind() {
            if flagged_directory != is_directory {
                return Err(Error::malformed(format!(
                    "{:?} is flagged as a {} but named as a {}",
                    record.file_name,
                    if flagged_directory { "directory" } else { "file" },
                    if is_directory { "directory" } else { "file" },
                )));
            }
        }

        Ok(Self {
            mime_type: mime::for_path(&path, is_directory).to_string(),
            size: if is_directory { 0 } else { record.uncompressed_size },
            compressed_size: record.compressed_size,
            last_modified: record.last_modified(),
            path,
            is_directory,
            record: Some(record),
        })
    }

    /// The codec record backing this entry, if it came from an archive.
    pub fn record(&self) -> Option<&ZipFileEntry> {
        self.record.as_ref()
    }

    /// Last path segment; empty for the root.
    pub fn display_name(&self) -> &str {
        self.path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }
}

/// Turns a stored entry name into an absolute path, rejecting names that
/// would escape or alias other entries.
pub fn normalize(name: &str) -> Result<String> {
    if name == ROOT {
        return Ok(ROOT.to_string());
    }
    let relative = name.strip_prefix('/').unwrap_or(name);
    let body = relative.strip_suffix('/').unwrap_or(relative);
    if body.is_empty() {
        return Err(Error::malformed(format!("entry name {name:?} is empty")));
    }
    if body.split('/').any(|s| s.is_empty() || s == "." || s == "..") {
        return Err(Error::malformed(format!(
            "entry name {name:?} has an empty, '.' or '..' segment"
        )));
    }
    Ok(format!("/{relative}"))
}

/// Parent directory of a path, `None` for the root.
pub fn parent_path(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    trimmed.rfind('/').map(|i| &path[..=i])
}

/// Whether `path` lies strictly below the directory `parent`.
pub fn is_descendant(parent: &str, path: &str) -> bool {
    let parent = slash_terminated(parent);
    let path = slash_terminated(path);
    path.starts_with(parent.as_str()) && path != parent
}

fn slash_terminated(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

/// Path and child index of one archive.
#[derive(Debug, Clone)]
pub struct EntryTree {
    entries: HashMap<String, Entry>,
    children: HashMap<String, Vec<String>>,
}

impl Default for EntryTree {
    fn default() -> Self {
        let mut tree = Self {
            entries: HashMap::new(),
            children: HashMap::new(),
        };
        tree.ensure_root();
        tree
    }
}

impl EntryTree {
    /// A tree holding only the root directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes central directory records.
    ///
    /// All records are collected before any is linked to its parent: record
    /// order does not put parents first, and intermediate directories may be
    /// missing entirely.
    pub fn build(records: Vec<ZipFileEntry>) -> Result<Self> {
        let mut tree = Self {
            entries: HashMap::with_capacity(records.len() + 1),
            children: HashMap::new(),
        };
        let mut order = Vec::with_capacity(records.len());

        for record in records {
            let entry = Entry::from_record(record)?;
            if tree.entries.contains_key(&entry.path) {
                return Err(Error::malformed(format!("duplicate entry {}", entry.path)));
            }
            let counterpart = if entry.is_directory {
                entry.path.trim_end_matches('/').to_string()
            } else {
                format!("{}/", entry.path)
            };
            if tree.entries.contains_key(&counterpart) {
                return Err(Error::malformed(format!(
                    "{} is recorded as both a file and a directory",
                    entry.path.trim_end_matches('/')
                )));
            }
            if entry.is_directory {
                tree.children.insert(entry.path.clone(), Vec::new());
            }
            order.push(entry.path.clone());
            tree.entries.insert(entry.path.clone(), entry);
        }

        tree.ensure_root();
        for path in order {
            tree.link(path)?;
        }
        Ok(tree)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&Entry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Children of a directory, `None` if `path` is not a directory.
    pub fn children(&self, path: &str) -> Option<Vec<&Entry>> {
        let children = self.children.get(path)?;
        Some(children.iter().filter_map(|p| self.entries.get(p)).collect())
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    /// Creates a new entry named `name` inside the directory `parent`.
    ///
    /// The entry is a directory when `mime_type` is the directory MIME type.
    pub fn add(&mut self, parent: &str, name: &str, mime_type: &str) -> Result<Entry> {
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return Err(Error::InvalidName(name.to_string()));
        }
        if !self.children.contains_key(parent) {
            return Err(Error::not_found(format!("directory {parent}")));
        }

        let file_path = format!("{parent}{name}");
        let dir_path = format!("{file_path}/");
        if self.entries.contains_key(&file_path) || self.entries.contains_key(&dir_path) {
            return Err(Error::AlreadyExists(file_path));
        }

        let is_directory = mime_type == mime::DIRECTORY;
        let path = if is_directory { dir_path } else { file_path };
        let entry = Entry::created(path.clone(), is_directory, mime_type);
        if is_directory {
            self.children.insert(path.clone(), Vec::new());
        }
        self.entries.insert(path.clone(), entry.clone());
        self.link(path)?;
        Ok(entry)
    }

    /// Records the final size of a written file.
    pub fn set_size(&mut self, path: &str, size: u64) {
        if let Some(entry) = self.entries.get_mut(path) {
            entry.size = size;
        }
    }

    fn ensure_root(&mut self) {
        if !self.entries.contains_key(ROOT) {
            self.entries.insert(ROOT.to_string(), Entry::directory(ROOT));
        }
        self.children.entry(ROOT.to_string()).or_default();
    }

    /// Appends `path` to its parent's children, synthesizing missing
    /// ancestors up to the first one that exists.
    fn link(&mut self, path: String) -> Result<()> {
        let mut child = path;
        while let Some(parent) = parent_path(&child).map(str::to_string) {
            let synthesized = !self.entries.contains_key(&parent);
            if synthesized {
                let as_file = parent.trim_end_matches('/');
                if self.entries.contains_key(as_file) {
                    return Err(Error::malformed(format!("{child} lies inside file {as_file}")));
                }
                self.entries.insert(parent.clone(), Entry::directory(&parent));
                self.children.insert(parent.clone(), Vec::new());
            }
            let Some(siblings) = self.children.get_mut(&parent) else {
                return Err(Error::malformed(format!("{child} lies inside file {parent}")));
            };
            siblings.push(child);
            if !synthesized {
                break;
            }
            child = parent;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::{CompressionMethod, VERSION_MADE_BY, external_attrs};
    use proptest::prelude::*;

    fn record(name: &str) -> ZipFileEntry {
        let is_directory = name.ends_with('/');
        ZipFileEntry {
            file_name: name.to_string(),
            compression_method: CompressionMethod::Deflate,
            compressed_size: 3,
            uncompressed_size: if is_directory { 0 } else { 10 },
            crc32: 0,
            lfh_offset: 0,
            last_mod_time: 0,
            last_mod_date: 0,
            flags: 0,
            version_made_by: 20,
            external_attrs: 0,
            is_directory,
        }
    }

    fn build(names: &[&str]) -> Result<EntryTree> {
        EntryTree::build(names.iter().map(|n| record(n)).collect())
    }

    fn child_paths(tree: &EntryTree, path: &str) -> Vec<String> {
        let mut paths: Vec<_> = tree
            .children(path)
            .unwrap()
            .into_iter()
            .map(|e| e.path.clone())
            .collect();
        paths.sort();
        paths
    }

    #[test]
    fn path_helpers() {
        assert_eq!(normalize("a/b.txt").unwrap(), "/a/b.txt");
        assert_eq!(normalize("/a/").unwrap(), "/a/");
        assert!(normalize("").is_err());
        assert!(normalize("a//b").is_err());
        assert!(normalize("../etc/passwd").is_err());
        assert!(normalize("a/./b").is_err());

        assert_eq!(parent_path("/a/b.txt"), Some("/a/"));
        assert_eq!(parent_path("/a/b/"), Some("/a/"));
        assert_eq!(parent_path("/a/"), Some("/"));
        assert_eq!(parent_path("/"), None);

        assert!(is_descendant("/a/", "/a/b.txt"));
        assert!(is_descendant("/", "/a/"));
        assert!(!is_descendant("/a/", "/a/"));
        assert!(!is_descendant("/a/", "/ab.txt"));
        assert!(!is_descendant("/a", "/ab/c"));
    }

    #[test]
    fn missing_root_and_parents_are_synthesized() {
        let tree = build(&["a/", "a/b.txt"]).unwrap();
        assert!(tree.get("/").unwrap().is_directory);
        assert!(tree.get("/a/").unwrap().is_directory);
        assert_eq!(child_paths(&tree, "/"), ["/a/"]);
        assert_eq!(child_paths(&tree, "/a/"), ["/a/b.txt"]);
    }

    #[test]
    fn deep_chains_are_synthesized_once() {
        let tree = build(&["x/y/z/one.txt", "x/y/z/two.txt", "x/y/other.txt"]).unwrap();
        assert_eq!(tree.len(), 7);
        assert_eq!(child_paths(&tree, "/"), ["/x/"]);
        assert_eq!(child_paths(&tree, "/x/"), ["/x/y/"]);
        assert_eq!(child_paths(&tree, "/x/y/"), ["/x/y/other.txt", "/x/y/z/"]);
        assert_eq!(child_paths(&tree, "/x/y/z/"), ["/x/y/z/one.txt", "/x/y/z/two.txt"]);
        let synthesized = tree.get("/x/y/").unwrap();
        assert!(synthesized.record().is_none());
        assert_eq!(synthesized.size, 0);
    }

    #[test]
    fn children_before_parents_link_once() {
        let tree = build(&["d/f.txt", "d/"]).unwrap();
        assert_eq!(child_paths(&tree, "/"), ["/d/"]);
        assert_eq!(child_paths(&tree, "/d/"), ["/d/f.txt"]);
        assert!(tree.get("/d/").unwrap().record().is_some());
    }

    #[test]
    fn inconsistent_records_are_malformed() {
        assert!(matches!(build(&["a.txt", "a.txt"]), Err(Error::MalformedArchive(_))));
        assert!(matches!(build(&["f", "f/g"]), Err(Error::MalformedArchive(_))));
        assert!(matches!(build(&["f/g", "f"]), Err(Error::MalformedArchive(_))));
        assert!(matches!(build(&["f/g/h", "f"]), Err(Error::MalformedArchive(_))));
        assert!(matches!(build(&["f", "f/"]), Err(Error::MalformedArchive(_))));
        assert!(matches!(build(&["f/", "f"]), Err(Error::MalformedArchive(_))));

        let mut flagged = record("not-a-dir");
        flagged.version_made_by = VERSION_MADE_BY;
        flagged.external_attrs = external_attrs(true);
        assert!(matches!(
            EntryTree::build(vec![flagged]),
            Err(Error::MalformedArchive(_))
        ));

        let mut flagged = record("dir/");
        flagged.version_made_by = VERSION_MADE_BY;
        flagged.external_attrs = external_attrs(false);
        assert!(matches!(
            EntryTree::build(vec![flagged]),
            Err(Error::MalformedArchive(_))
        ));
    }

    #[test]
    fn empty_archive_has_root() {
        let tree = build(&[]).unwrap();
        assert_eq!(tree.len(), 1);
        assert!(tree.children("/").unwrap().is_empty());
        assert_eq!(tree.get("/").unwrap().display_name(), "");
    }

    #[test]
    fn metadata_comes_from_the_record() {
        let tree = build(&["docs/readme.md"]).unwrap();
        let entry = tree.get("/docs/readme.md").unwrap();
        assert_eq!(entry.size, 10);
        assert_eq!(entry.compressed_size, 3);
        assert_eq!(entry.mime_type, "text/markdown");
        assert_eq!(entry.display_name(), "readme.md");
        assert_eq!(tree.get("/docs/").unwrap().display_name(), "docs");
        assert_eq!(tree.get("/docs/").unwrap().mime_type, mime::DIRECTORY);
    }

    #[test]
    fn add_validates_and_links() {
        let mut tree = EntryTree::new();
        let dir = tree.add("/", "photos", mime::DIRECTORY).unwrap();
        assert_eq!(dir.path, "/photos/");
        let file = tree.add("/photos/", "cat.jpg", "image/jpeg").unwrap();
        assert_eq!(file.path, "/photos/cat.jpg");
        assert!(!file.is_directory);
        assert_eq!(child_paths(&tree, "/photos/"), ["/photos/cat.jpg"]);

        assert!(matches!(tree.add("/photos/", "", "text/plain"), Err(Error::InvalidName(_))));
        assert!(matches!(tree.add("/photos/", "..", "text/plain"), Err(Error::InvalidName(_))));
        assert!(matches!(tree.add("/photos/", "a/b", "text/plain"), Err(Error::InvalidName(_))));
        assert!(matches!(tree.add("/nope/", "x", "text/plain"), Err(Error::NotFound(_))));
        assert!(matches!(tree.add("/photos/cat.jpg", "x", "text/plain"), Err(Error::NotFound(_))));
        assert!(matches!(
            tree.add("/photos/", "cat.jpg", mime::DIRECTORY),
            Err(Error::AlreadyExists(_))
        ));
        assert!(matches!(tree.add("/", "photos", "text/plain"), Err(Error::AlreadyExists(_))));

        tree.set_size("/photos/cat.jpg", 42);
        assert_eq!(tree.get("/photos/cat.jpg").unwrap().size, 42);
    }

    proptest! {
        #[test]
        fn every_entry_has_its_parent(
            names in prop::collection::hash_set("[a-c]{1,2}(/[a-c]{1,2}){0,4}", 1..24),
        ) {
            // Names that are a prefix of another name become directories.
            let names: Vec<String> = names.iter().map(|n| {
                let is_prefix = names.iter().any(|o| o.starts_with(&format!("{n}/")));
                if is_prefix { format!("{n}/") } else { n.clone() }
            }).collect();
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            let tree = build(&refs).unwrap();

            for entry in tree.entries() {
                if let Some(parent) = parent_path(&entry.path) {
                    let siblings = tree.children(parent).unwrap();
                    prop_assert!(siblings.iter().any(|e| e.path == entry.path));
                }
            }
        }
    }
}
