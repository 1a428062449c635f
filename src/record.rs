//! In-memory representation of the entries captured by a walk.
//!
//! A walk produces one [`Record`] per directory or regular file below the
//! scan root. Records are keyed by their slash-separated path relative to the
//! root and are never mutated once created.

use std::collections::BTreeMap;
use std::fmt;

/// Ownership and permission attributes of a filesystem entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryAttrs {
    pub uid: u32,
    pub gid: u32,
    /// Symbolic permission string, e.g. `drwxr-xr-x`.
    pub mode: String,
}

/// Why an entry could not be fully observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadError {
    pub reason: String,
}

impl ReadError {
    pub fn new(reason: impl Into<String>) -> Self {
        ReadError {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    pub relative_path: String,
    pub attrs: Result<EntryAttrs, ReadError>,
    /// Set when the directory could be stat'd but its entries could not be
    /// listed. Not persisted in the baseline log.
    pub listing_error: Option<ReadError>,
}

impl DirectoryRecord {
    pub fn is_unreadable(&self) -> bool {
        self.attrs.is_err() || self.listing_error.is_some()
    }
}

/// What was observed about a readable file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub checksum: u32,
    /// Number of bytes consumed while checksumming.
    pub size: u64,
    pub attrs: EntryAttrs,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub relative_path: String,
    pub content: Result<FileContent, ReadError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Dir(DirectoryRecord),
    File(FileRecord),
}

impl Record {
    pub fn relative_path(&self) -> &str {
        match self {
            Record::Dir(dir) => &dir.relative_path,
            Record::File(file) => &file.relative_path,
        }
    }

    pub fn is_unreadable(&self) -> bool {
        match self {
            Record::Dir(dir) => dir.is_unreadable(),
            Record::File(file) => file.content.is_err(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RecordSetError {
    #[error("Duplicate directory record: {0}")]
    DuplicateDir(String),
    #[error("Duplicate file record: {0}")]
    DuplicateFile(String),
}

/// All records produced by one walk or read from one log, partitioned by
/// kind. Paths are unique per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSet {
    dirs: BTreeMap<String, DirectoryRecord>,
    files: BTreeMap<String, FileRecord>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: Record) -> Result<(), RecordSetError> {
        match record {
            Record::Dir(dir) => {
                if self.dirs.contains_key(&dir.relative_path) {
                    return Err(RecordSetError::DuplicateDir(dir.relative_path));
                }
                self.dirs.insert(dir.relative_path.clone(), dir);
            }
            Record::File(file) => {
                if self.files.contains_key(&file.relative_path) {
                    return Err(RecordSetError::DuplicateFile(file.relative_path));
                }
                self.files.insert(file.relative_path.clone(), file);
            }
        }
        Ok(())
    }

    pub fn dirs(&self) -> &BTreeMap<String, DirectoryRecord> {
        &self.dirs
    }

    pub fn files(&self) -> &BTreeMap<String, FileRecord> {
        &self.files
    }

    pub fn dir_count(&self) -> usize {
        self.dirs.len()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}
