//! Reconciliation of a baseline record set against a freshly walked one.
//!
//! This is a keyed join, not a positional diff: records are matched by
//! relative path and kind, then compared field by field. Every field that
//! differs lands in its own category, so one path can show up in several.

use crate::record::{DirectoryRecord, EntryAttrs, FileRecord, RecordSet};
use std::collections::{BTreeMap, BTreeSet};

/// uid/gid that NFS and user namespaces map unknown ids to (`nobody`).
pub const ANONYMOUS_ID: u32 = 65534;

/// uid/gid of the superuser.
pub const ROOT_ID: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    MissingDirs,
    ExtraDirs,
    UnreadableDirs,
    DirUidMismatch,
    DirGidMismatch,
    DirModeMismatch,
    MissingFiles,
    ExtraFiles,
    UnreadableFiles,
    ChecksumMismatch,
    SizeMismatch,
    FileUidMismatch,
    FileGidMismatch,
    FileModeMismatch,
    /// Directory on one side, file on the other.
    TypeMismatch,
    IdMapping,
    RootOwnership,
}

impl Category {
    pub const ALL: [Category; 17] = [
        Category::MissingDirs,
        Category::ExtraDirs,
        Category::UnreadableDirs,
        Category::DirUidMismatch,
        Category::DirGidMismatch,
        Category::DirModeMismatch,
        Category::MissingFiles,
        Category::ExtraFiles,
        Category::UnreadableFiles,
        Category::ChecksumMismatch,
        Category::SizeMismatch,
        Category::FileUidMismatch,
        Category::FileGidMismatch,
        Category::FileModeMismatch,
        Category::TypeMismatch,
        Category::IdMapping,
        Category::RootOwnership,
    ];

    /// Advisory categories flag a condition on the current tree only and do
    /// not make a verification fail.
    pub fn is_advisory(self) -> bool {
        matches!(self, Category::IdMapping | Category::RootOwnership)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Flag common files whose current uid or gid is [`ANONYMOUS_ID`].
    pub check_idmap: bool,
    /// Flag common files whose current uid or gid is [`ROOT_ID`].
    pub check_root: bool,
    /// Compare existence, checksum and size only; ignore uid, gid and mode.
    pub content_only: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub baseline_dirs: usize,
    pub current_dirs: usize,
    pub baseline_files: usize,
    pub current_files: usize,
}

/// Categorized differences between two record sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    findings: BTreeMap<Category, Vec<String>>,
    pub counts: Counts,
}

impl Report {
    /// Paths in `category`, sorted.
    pub fn paths(&self, category: Category) -> &[String] {
        self.findings
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// True when some non-advisory category is non-empty.
    pub fn has_discrepancies(&self) -> bool {
        self.findings
            .iter()
            .any(|(category, paths)| !category.is_advisory() && !paths.is_empty())
    }

    fn push(&mut self, category: Category, path: &str) {
        self.findings
            .entry(category)
            .or_default()
            .push(path.to_string());
    }
}

/// Compares the baseline `baseline` against the current tree `current`.
pub fn reconcile(baseline: &RecordSet, current: &RecordSet, options: &ReconcileOptions) -> Report {
    let mut report = Report {
        findings: BTreeMap::new(),
        counts: Counts {
            baseline_dirs: baseline.dir_count(),
            current_dirs: current.dir_count(),
            baseline_files: baseline.file_count(),
            current_files: current.file_count(),
        },
    };

    let type_mismatches: BTreeSet<&str> = baseline
        .dirs()
        .keys()
        .filter(|path| current.files().contains_key(*path))
        .chain(
            baseline
                .files()
                .keys()
                .filter(|path| current.dirs().contains_key(*path)),
        )
        .map(String::as_str)
        .collect();
    for path in &type_mismatches {
        report.push(Category::TypeMismatch, path);
    }

    for (path, old) in baseline.dirs() {
        if type_mismatches.contains(path.as_str()) {
            continue;
        }
        match current.dirs().get(path) {
            Some(new) => compare_dirs(old, new, options, &mut report),
            None => report.push(Category::MissingDirs, path),
        }
    }
    for (path, new) in current.dirs() {
        if type_mismatches.contains(path.as_str()) || baseline.dirs().contains_key(path) {
            continue;
        }
        report.push(Category::ExtraDirs, path);
        if new.is_unreadable() {
            report.push(Category::UnreadableDirs, path);
        }
    }

    for (path, old) in baseline.files() {
        if type_mismatches.contains(path.as_str()) {
            continue;
        }
        match current.files().get(path) {
            Some(new) => compare_files(old, new, options, &mut report),
            None => report.push(Category::MissingFiles, path),
        }
    }
    for (path, new) in current.files() {
        if type_mismatches.contains(path.as_str()) || baseline.files().contains_key(path) {
            continue;
        }
        report.push(Category::ExtraFiles, path);
        if new.content.is_err() {
            report.push(Category::UnreadableFiles, path);
        }
    }

    for paths in report.findings.values_mut() {
        paths.sort();
    }

    report
}

fn compare_dirs(
    old: &DirectoryRecord,
    new: &DirectoryRecord,
    options: &ReconcileOptions,
    report: &mut Report,
) {
    let path = &new.relative_path;
    // A directory that was stat'd but not listed still has attributes to
    // compare.
    if let (Ok(old_attrs), Ok(new_attrs)) = (&old.attrs, &new.attrs)
        && !options.content_only
    {
        compare_attrs(
            path,
            old_attrs,
            new_attrs,
            [
                Category::DirUidMismatch,
                Category::DirGidMismatch,
                Category::DirModeMismatch,
            ],
            report,
        );
    }
    if old.is_unreadable() || new.is_unreadable() {
        report.push(Category::UnreadableDirs, path);
    }
}

fn compare_files(
    old: &FileRecord,
    new: &FileRecord,
    options: &ReconcileOptions,
    report: &mut Report,
) {
    let path = &new.relative_path;
    let (old_content, new_content) = match (&old.content, &new.content) {
        (Ok(old_content), Ok(new_content)) => (old_content, new_content),
        _ => {
            report.push(Category::UnreadableFiles, path);
            return;
        }
    };

    if old_content.checksum != new_content.checksum {
        report.push(Category::ChecksumMismatch, path);
    }
    if old_content.size != new_content.size {
        report.push(Category::SizeMismatch, path);
    }
    if !options.content_only {
        compare_attrs(
            path,
            &old_content.attrs,
            &new_content.attrs,
            [
                Category::FileUidMismatch,
                Category::FileGidMismatch,
                Category::FileModeMismatch,
            ],
            report,
        );
    }

    let current = &new_content.attrs;
    if options.check_idmap && (current.uid == ANONYMOUS_ID || current.gid == ANONYMOUS_ID) {
        report.push(Category::IdMapping, path);
    }
    if options.check_root && (current.uid == ROOT_ID || current.gid == ROOT_ID) {
        report.push(Category::RootOwnership, path);
    }
}

fn compare_attrs(
    path: &str,
    old: &EntryAttrs,
    new: &EntryAttrs,
    [uid, gid, mode]: [Category; 3],
    report: &mut Report,
) {
    if old.uid != new.uid {
        report.push(uid, path);
    }
    if old.gid != new.gid {
        report.push(gid, path);
    }
    if old.mode != new.mode {
        report.push(mode, path);
    }
}
