//! Streaming tree walk with parallel checksumming.
//!
//! A single control thread lists directories depth-first using an explicit
//! stack and reads entry metadata. Directory records are handed to the sink
//! on the control thread in traversal order. Regular files are sent as jobs
//! over a bounded channel to a fixed pool of checksum workers, which hand
//! their file records to the sink in completion order.
//!
//! The channel capacity bounds the number of queued jobs: once it is full,
//! submitting blocks the control thread until a worker picks up a job, so
//! memory stays flat no matter how many files the tree holds.
//!
//! Symlinks are never followed. Symlinks, FIFOs, sockets and device nodes are
//! skipped. The scan root itself is not recorded.

use crate::baseline_log::BaselineWriter;
use crate::checksum::Checksummer;
use crate::platform;
use crate::record::{
    DirectoryRecord, EntryAttrs, FileContent, FileRecord, ReadError, Record, RecordSet,
    RecordSetError,
};
use crossbeam_channel::{Receiver, Sender, bounded};
use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs::{self, DirEntry};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use tracing::{debug, info, warn};

pub const DEFAULT_WORKERS: usize = 4;

/// Queue depth per worker when none is configured.
pub const QUEUE_DEPTH_PER_WORKER: usize = 2;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Failed to write record: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to collect record: {0}")]
    RecordSet(#[from] RecordSetError),
    #[error("Record collector lock poisoned")]
    Poisoned,
}

#[derive(Debug, thiserror::Error)]
pub enum WalkError {
    #[error("Scan root not found: {0}")]
    RootNotFound(PathBuf),
    #[error("Permission denied: {0}")]
    RootPermissionDenied(PathBuf),
    #[error("Scan root is not a directory: {0}")]
    RootNotDirectory(PathBuf),
    #[error("IO error: {0}")]
    Io(std::io::Error),
    #[error("Failed to start checksum worker: {0}")]
    SpawnWorker(std::io::Error),
    #[error("Checksum worker panicked")]
    WorkerPanicked,
    #[error(transparent)]
    Sink(#[from] SinkError),
}

impl WalkError {
    fn from_root_io(e: std::io::Error, root: &Path) -> Self {
        match e.kind() {
            ErrorKind::NotFound => WalkError::RootNotFound(root.to_path_buf()),
            ErrorKind::PermissionDenied => WalkError::RootPermissionDenied(root.to_path_buf()),
            _ => WalkError::Io(e),
        }
    }
}

/// Consumer of the records a walk produces.
///
/// `accept` is called concurrently from the control thread and every
/// checksum worker; implementations serialize internally.
pub trait RecordSink: Sync {
    fn accept(&self, record: Record) -> Result<(), SinkError>;
}

impl RecordSink for BaselineWriter {
    fn accept(&self, record: Record) -> Result<(), SinkError> {
        self.append(&record)?;
        Ok(())
    }
}

impl RecordSink for Mutex<RecordSet> {
    fn accept(&self, record: Record) -> Result<(), SinkError> {
        let mut records = self.lock().map_err(|_| SinkError::Poisoned)?;
        records.insert(record)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct WalkOptions {
    pub workers: usize,
    /// Maximum number of file jobs waiting for a worker.
    pub queue_depth: usize,
    /// Absolute paths that are neither recorded nor descended into.
    pub excluded: Vec<PathBuf>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        WalkOptions {
            workers: DEFAULT_WORKERS,
            queue_depth: DEFAULT_WORKERS * QUEUE_DEPTH_PER_WORKER,
            excluded: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub directories: u64,
    pub files: u64,
    /// Directories and files recorded as unreadable.
    pub unreadable: u64,
    /// Symlinks and special files that were not recorded.
    pub skipped: u64,
}

struct FileJob {
    path: PathBuf,
    relative_path: String,
    attrs: EntryAttrs,
}

struct PendingDir {
    path: PathBuf,
    relative_path: String,
    attrs: EntryAttrs,
}

/// State shared between the control thread and the workers.
#[derive(Default)]
struct Shared {
    failed: AtomicBool,
    failure: Mutex<Option<SinkError>>,
    unreadable_files: AtomicU64,
}

impl Shared {
    fn fail(&self, error: SinkError) {
        if let Ok(mut slot) = self.failure.lock()
            && slot.is_none()
        {
            *slot = Some(error);
        }
        self.failed.store(true, Ordering::SeqCst);
    }

    fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> Option<SinkError> {
        self.failure.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Resolves `root` to an absolute path and checks it is a directory.
pub fn canonical_root(root: &Path) -> Result<PathBuf, WalkError> {
    let canonical = root
        .canonicalize()
        .map_err(|e| WalkError::from_root_io(e, root))?;
    let metadata = fs::metadata(&canonical).map_err(|e| WalkError::from_root_io(e, &canonical))?;
    if !metadata.is_dir() {
        return Err(WalkError::RootNotDirectory(canonical));
    }
    Ok(canonical)
}

/// Walks the tree below `root`, feeding every directory and regular file
/// record to `sink`.
///
/// Per-entry failures become unreadable records and never stop the walk.
/// The walk aborts when the root cannot be listed or the sink fails.
pub fn walk_tree<S: RecordSink>(
    root: &Path,
    options: &WalkOptions,
    sink: &S,
) -> Result<WalkStats, WalkError> {
    let root = canonical_root(root)?;
    let root_entries = list_children(&root).map_err(|e| WalkError::from_root_io(e, &root))?;

    let workers = options.workers.max(1);
    let (job_tx, job_rx) = bounded::<FileJob>(options.queue_depth.max(1));
    let shared = Shared::default();

    info!(
        "Walking {} with {} checksum workers (queue depth {})",
        root.display(),
        workers,
        options.queue_depth.max(1)
    );

    let result = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let job_rx = job_rx.clone();
            let shared = &shared;
            let handle = thread::Builder::new()
                .name(format!("checksum-{i}"))
                .spawn_scoped(scope, move || checksum_worker(job_rx, sink, shared))
                .map_err(WalkError::SpawnWorker)?;
            handles.push(handle);
        }
        drop(job_rx);

        let mut traversal = Traversal {
            excluded: options.excluded.iter().cloned().collect(),
            job_tx,
            sink,
            shared: &shared,
            stack: Vec::new(),
            stats: WalkStats::default(),
        };
        let walked = traversal.run(root_entries);
        let stats = traversal.stats;
        // Closing the channel lets the workers drain the queue and exit.
        drop(traversal);

        let mut panicked = false;
        for handle in handles {
            panicked |= handle.join().is_err();
        }
        if panicked {
            return Err(WalkError::WorkerPanicked);
        }
        walked.map(|()| stats)
    });

    if let Some(error) = shared.take_failure() {
        return Err(WalkError::Sink(error));
    }

    let mut stats = result?;
    stats.unreadable += shared.unreadable_files.load(Ordering::SeqCst);

    info!(
        "Walked {} directories and {} files ({} unreadable, {} skipped)",
        stats.directories, stats.files, stats.unreadable, stats.skipped
    );

    Ok(stats)
}

struct Traversal<'a, S> {
    excluded: HashSet<PathBuf>,
    job_tx: Sender<FileJob>,
    sink: &'a S,
    shared: &'a Shared,
    stack: Vec<PendingDir>,
    stats: WalkStats,
}

impl<S: RecordSink> Traversal<'_, S> {
    fn run(&mut self, root_entries: Vec<DirEntry>) -> Result<(), WalkError> {
        self.visit_children("", root_entries)?;

        while let Some(dir) = self.stack.pop() {
            if self.shared.has_failed() {
                return Ok(());
            }

            // The directory's own attributes are recorded even when its
            // entries cannot be listed.
            let listing = list_children(&dir.path);
            let listing_error = match &listing {
                Ok(_) => None,
                Err(e) => {
                    warn!("Cannot list directory {}: {}", dir.path.display(), e);
                    self.stats.unreadable += 1;
                    Some(ReadError::new(e.to_string()))
                }
            };

            self.stats.directories += 1;
            self.sink.accept(Record::Dir(DirectoryRecord {
                relative_path: dir.relative_path.clone(),
                attrs: Ok(dir.attrs),
                listing_error,
            }))?;

            if let Ok(entries) = listing {
                self.visit_children(&dir.relative_path, entries)?;
            }
        }

        Ok(())
    }

    fn visit_children(&mut self, parent: &str, entries: Vec<DirEntry>) -> Result<(), WalkError> {
        let mut subdirs = Vec::new();
        let mut names = HashSet::new();

        for entry in entries {
            let path = entry.path();
            if self.excluded.contains(&path) {
                debug!("Skipping excluded {}", path.display());
                continue;
            }

            let name = entry.file_name();
            let name = match name.to_str() {
                Some(name) => name.to_string(),
                None => {
                    warn!("Recording non-UTF-8 name with escapes: {}", path.display());
                    escape_non_utf8(&name)
                }
            };
            if !names.insert(name.clone()) {
                // Only reachable when an escaped name spells an existing one.
                warn!(
                    "Skipping {}: its recorded name {:?} is already taken",
                    path.display(),
                    name
                );
                self.stats.skipped += 1;
                continue;
            }
            let relative_path = if parent.is_empty() {
                name
            } else {
                format!("{parent}/{name}")
            };

            let metadata = match fs::symlink_metadata(&path) {
                Ok(metadata) => metadata,
                Err(e) => {
                    // Kind unknown; record it as a file so its existence is
                    // still reconciled.
                    warn!("Cannot stat {}: {}", path.display(), e);
                    self.stats.files += 1;
                    self.stats.unreadable += 1;
                    self.sink.accept(Record::File(FileRecord {
                        relative_path,
                        content: Err(ReadError::new(e.to_string())),
                    }))?;
                    continue;
                }
            };

            let file_type = metadata.file_type();
            if file_type.is_dir() {
                subdirs.push(PendingDir {
                    path,
                    relative_path,
                    attrs: platform::entry_attrs(&metadata),
                });
            } else if file_type.is_file() {
                self.stats.files += 1;
                self.submit(FileJob {
                    path,
                    relative_path,
                    attrs: platform::entry_attrs(&metadata),
                })?;
            } else {
                debug!("Skipping symlink or special file {}", path.display());
                self.stats.skipped += 1;
            }
        }

        // Reversed so that the stack pops siblings in name order.
        self.stack.extend(subdirs.into_iter().rev());
        Ok(())
    }

    fn submit(&self, job: FileJob) -> Result<(), WalkError> {
        if self.shared.has_failed() {
            return Ok(());
        }
        // Blocks while the queue is full.
        if self.job_tx.send(job).is_err() {
            // Every worker is gone; the failure slot says why.
            self.shared.failed.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

fn checksum_worker<S: RecordSink>(jobs: Receiver<FileJob>, sink: &S, shared: &Shared) {
    let mut checksummer = Checksummer::default();

    for job in jobs.iter() {
        if shared.has_failed() {
            continue;
        }

        let content = match checksummer.checksum_file(&job.path) {
            Ok(checksum) => Ok(FileContent {
                checksum: checksum.crc32,
                size: checksum.size,
                attrs: job.attrs,
            }),
            Err(e) => {
                warn!("Cannot read {}: {}", job.path.display(), e);
                shared.unreadable_files.fetch_add(1, Ordering::SeqCst);
                Err(ReadError::new(e.to_string()))
            }
        };

        let record = Record::File(FileRecord {
            relative_path: job.relative_path,
            content,
        });
        if let Err(e) = sink.accept(record) {
            shared.fail(e);
        }
    }
}

/// Text form of a name that is not valid UTF-8: valid runs are kept,
/// backslashes doubled and every invalid byte written as `\xHH`, so distinct
/// names stay distinct.
#[cfg(unix)]
fn escape_non_utf8(name: &OsStr) -> String {
    use std::os::unix::ffi::OsStrExt;

    let mut out = String::with_capacity(name.len() * 2);
    for chunk in name.as_bytes().utf8_chunks() {
        for c in chunk.valid().chars() {
            if c == '\\' {
                out.push_str("\\\\");
            } else {
                out.push(c);
            }
        }
        for byte in chunk.invalid() {
            out.push_str(&format!("\\x{byte:02x}"));
        }
    }
    out
}

#[cfg(not(unix))]
fn escape_non_utf8(name: &OsStr) -> String {
    name.to_string_lossy().into_owned()
}

/// Lists a directory's entries sorted by name.
fn list_children(dir: &Path) -> std::io::Result<Vec<DirEntry>> {
    let mut entries = fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    fn collect(root: &Path, options: &WalkOptions) -> (RecordSet, WalkStats) {
        let sink = Mutex::new(RecordSet::new());
        let stats = walk_tree(root, options, &sink).unwrap();
        (sink.into_inner().unwrap(), stats)
    }

    #[cfg(unix)]
    fn running_as_root() -> bool {
        unsafe { libc::geteuid() == 0 }
    }

    fn sample_tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(root.join("a.txt"), "hello").unwrap();
        fs::create_dir(root.join("dir")).unwrap();
        fs::write(root.join("dir/b.txt"), "world").unwrap();
        fs::create_dir(root.join("dir/empty")).unwrap();
        temp
    }

    #[test]
    fn test_walk_records_dirs_and_files() {
        let temp = sample_tree();

        let (records, stats) = collect(temp.path(), &WalkOptions::default());

        let dirs: Vec<&str> = records.dirs().keys().map(String::as_str).collect();
        let files: Vec<&str> = records.files().keys().map(String::as_str).collect();
        assert_eq!(dirs, vec!["dir", "dir/empty"]);
        assert_eq!(files, vec!["a.txt", "dir/b.txt"]);
        assert_eq!(
            stats,
            WalkStats {
                directories: 2,
                files: 2,
                unreadable: 0,
                skipped: 0
            }
        );

        let a = records.files()["a.txt"].content.as_ref().unwrap();
        assert_eq!(a.checksum, 0x3610a686);
        assert_eq!(a.size, 5);
        assert!(records.dirs()["dir"].attrs.is_ok());
    }

    #[test]
    fn test_walk_is_deterministic() {
        let temp = sample_tree();

        let (first, _) = collect(temp.path(), &WalkOptions::default());
        let (second, _) = collect(temp.path(), &WalkOptions::default());

        assert_eq!(first, second);
    }

    #[test]
    fn test_directories_emitted_in_traversal_order() {
        struct OrderSink(Mutex<Vec<String>>);

        impl RecordSink for OrderSink {
            fn accept(&self, record: Record) -> Result<(), SinkError> {
                if let Record::Dir(dir) = record {
                    self.0.lock().unwrap().push(dir.relative_path);
                }
                Ok(())
            }
        }

        let temp = TempDir::new().unwrap();
        let root = temp.path();
        for dir in ["b", "a", "a/y", "a/x", "c"] {
            fs::create_dir(root.join(dir)).unwrap();
        }

        let sink = OrderSink(Mutex::new(Vec::new()));
        walk_tree(root, &WalkOptions::default(), &sink).unwrap();

        assert_eq!(
            sink.0.into_inner().unwrap(),
            vec!["a", "a/x", "a/y", "b", "c"]
        );
    }

    #[test]
    fn test_deep_tree_does_not_recurse() {
        let temp = TempDir::new().unwrap();
        let mut path = temp.path().to_path_buf();
        for _ in 0..400 {
            path.push("d");
        }
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("leaf"), "x").unwrap();

        let (records, stats) = collect(temp.path(), &WalkOptions::default());

        assert_eq!(stats.directories, 400);
        assert_eq!(records.file_count(), 1);
    }

    #[test]
    fn test_many_files_with_tiny_queue() {
        let temp = TempDir::new().unwrap();
        for i in 0..300 {
            fs::write(temp.path().join(format!("f{i:03}")), format!("{i}")).unwrap();
        }

        let options = WalkOptions {
            workers: 3,
            queue_depth: 1,
            excluded: Vec::new(),
        };
        let (records, stats) = collect(temp.path(), &options);

        assert_eq!(stats.files, 300);
        assert_eq!(records.file_count(), 300);
        let f7 = records.files()["f007"].content.as_ref().unwrap();
        assert_eq!(f7.checksum, crc32fast::hash(b"7"));
    }

    #[test]
    fn test_slow_sink_blocks_submission_without_losing_records() {
        // A slow sink stalls the single worker so the two-slot queue fills
        // up and submission has to wait.
        struct SlowSink {
            accepted: AtomicUsize,
        }

        impl RecordSink for SlowSink {
            fn accept(&self, record: Record) -> Result<(), SinkError> {
                if matches!(record, Record::File(_)) {
                    thread::sleep(std::time::Duration::from_millis(2));
                    self.accepted.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            }
        }

        let temp = TempDir::new().unwrap();
        for i in 0..50 {
            fs::write(temp.path().join(format!("f{i:02}")), "x").unwrap();
        }

        let sink = SlowSink {
            accepted: AtomicUsize::new(0),
        };
        let options = WalkOptions {
            workers: 1,
            queue_depth: 2,
            excluded: Vec::new(),
        };
        let stats = walk_tree(temp.path(), &options, &sink).unwrap();

        assert_eq!(stats.files, 50);
        assert_eq!(sink.accepted.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn test_excluded_paths_are_skipped() {
        let temp = sample_tree();
        let root = temp.path().canonicalize().unwrap();

        let options = WalkOptions {
            excluded: vec![root.join("a.txt"), root.join("dir/empty")],
            ..WalkOptions::default()
        };
        let (records, _) = collect(&root, &options);

        assert!(!records.files().contains_key("a.txt"));
        assert!(!records.dirs().contains_key("dir/empty"));
        assert!(records.files().contains_key("dir/b.txt"));
    }

    #[test]
    #[cfg(unix)]
    fn test_symlinks_are_not_followed() {
        let temp = sample_tree();
        let root = temp.path();
        std::os::unix::fs::symlink(root.join("dir"), root.join("dir_link")).unwrap();
        std::os::unix::fs::symlink(root.join("a.txt"), root.join("file_link")).unwrap();
        std::os::unix::fs::symlink(".", root.join("dir/loop")).unwrap();

        let (records, stats) = collect(root, &WalkOptions::default());

        assert_eq!(stats.skipped, 3);
        assert_eq!(records.dir_count(), 2);
        assert_eq!(records.file_count(), 2);
        assert!(!records.dirs().contains_key("dir_link"));
        assert!(!records.files().contains_key("file_link"));
    }

    #[test]
    #[cfg(unix)]
    fn test_fifo_is_skipped() {
        let temp = sample_tree();
        nix::unistd::mkfifo(
            &temp.path().join("pipe"),
            nix::sys::stat::Mode::S_IRUSR | nix::sys::stat::Mode::S_IWUSR,
        )
        .unwrap();

        let (records, stats) = collect(temp.path(), &WalkOptions::default());

        assert_eq!(stats.skipped, 1);
        assert!(!records.files().contains_key("pipe"));
    }

    #[test]
    #[cfg(unix)]
    fn test_unreadable_file_does_not_stop_walk() {
        use std::os::unix::fs::PermissionsExt;

        if running_as_root() {
            return;
        }

        let temp = sample_tree();
        let secret = temp.path().join("secret.txt");
        fs::write(&secret, "classified").unwrap();
        fs::set_permissions(&secret, fs::Permissions::from_mode(0o000)).unwrap();

        let (records, stats) = collect(temp.path(), &WalkOptions::default());

        assert_eq!(stats.unreadable, 1);
        assert_eq!(records.file_count(), 3);
        assert!(records.files()["secret.txt"].content.is_err());
        assert!(records.files()["a.txt"].content.is_ok());
        assert!(records.files()["dir/b.txt"].content.is_ok());
    }

    #[test]
    #[cfg(unix)]
    fn test_unlistable_directory_is_recorded_and_not_entered() {
        use std::os::unix::fs::PermissionsExt;

        if running_as_root() {
            return;
        }

        let temp = sample_tree();
        let locked = temp.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::write(locked.join("inner.txt"), "x").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        let sink = Mutex::new(RecordSet::new());
        let result = walk_tree(temp.path(), &WalkOptions::default(), &sink);

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        let stats = result.unwrap();
        let records = sink.into_inner().unwrap();
        assert_eq!(stats.unreadable, 1);
        let locked = &records.dirs()["locked"];
        assert!(locked.listing_error.is_some());
        assert_eq!(locked.attrs.as_ref().unwrap().mode, "d---------");
        assert!(!records.files().contains_key("locked/inner.txt"));
    }

    #[test]
    #[cfg(unix)]
    fn test_non_utf8_name_is_escaped() {
        use std::os::unix::ffi::OsStrExt;

        assert_eq!(escape_non_utf8(OsStr::from_bytes(b"caf\xe9")), "caf\\xe9");
        assert_eq!(escape_non_utf8(OsStr::from_bytes(b"a\\b\xff")), "a\\\\b\\xff");
    }

    #[test]
    #[cfg(unix)]
    fn test_name_colliding_with_escaped_name_is_skipped() {
        use std::os::unix::ffi::OsStrExt;

        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a\\xff"), "literal").unwrap();
        if fs::write(temp.path().join(OsStr::from_bytes(b"a\xff")), "raw").is_err() {
            return;
        }

        let (records, stats) = collect(temp.path(), &WalkOptions::default());

        // Entries are visited in byte order, so the literal name wins.
        assert_eq!(stats.files, 1);
        assert_eq!(stats.skipped, 1);
        let kept = records.files()["a\\xff"].content.as_ref().unwrap();
        assert_eq!(kept.size, "literal".len() as u64);
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope");

        let sink = Mutex::new(RecordSet::new());
        let result = walk_tree(&missing, &WalkOptions::default(), &sink);

        assert!(matches!(result, Err(WalkError::RootNotFound(_))));
    }

    #[test]
    fn test_file_root_is_fatal() {
        let temp = sample_tree();

        let sink = Mutex::new(RecordSet::new());
        let result = walk_tree(&temp.path().join("a.txt"), &WalkOptions::default(), &sink);

        assert!(matches!(result, Err(WalkError::RootNotDirectory(_))));
    }

    #[test]
    fn test_sink_failure_aborts_walk() {
        struct FailingSink;

        impl RecordSink for FailingSink {
            fn accept(&self, record: Record) -> Result<(), SinkError> {
                match record {
                    Record::File(_) => Err(SinkError::Io(std::io::Error::other("disk full"))),
                    Record::Dir(_) => Ok(()),
                }
            }
        }

        let temp = sample_tree();

        let result = walk_tree(temp.path(), &WalkOptions::default(), &FailingSink);

        match result {
            Err(WalkError::Sink(SinkError::Io(e))) => assert_eq!(e.to_string(), "disk full"),
            other => panic!("Expected sink error, got {other:?}"),
        }
    }
}
