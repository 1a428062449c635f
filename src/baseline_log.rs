//! The baseline log: one text line per record.
//!
//! ```text
//! DIR   <relative_path>  <uid>  <gid>  <mode>
//! FILE  <crc32_hex8>  <relative_path>  <size>  <uid>  <gid>  <mode>
//! ```
//!
//! Entries that could not be read carry `-` in every field that was not
//! observed. Paths are stored literally except for `\`, control whitespace
//! and leading/trailing spaces, which are backslash-escaped so that every
//! path fits on one line and survives the whitespace split.

use crate::record::{
    DirectoryRecord, EntryAttrs, FileContent, FileRecord, ReadError, Record, RecordSet,
    RecordSetError,
};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, trace};

/// File name used when no explicit log location is configured.
pub const DEFAULT_LOG_NAME: &str = ".integrity_hash.log";

/// Prefix of the temporary file a baseline is streamed into before it is
/// renamed into place.
pub const PARTIAL_PREFIX: &str = ".treecheck-partial-";

const DIR_TAG: &str = "DIR";
const FILE_TAG: &str = "FILE";
const UNOBSERVED: &str = "-";
const MODE_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogParseError {
    #[error("unknown record tag {0:?}")]
    UnknownTag(String),
    #[error("{0} record has too few fields")]
    MissingField(&'static str),
    #[error("invalid checksum {0:?} (expected 8 lowercase hex digits)")]
    InvalidChecksum(String),
    #[error("invalid {field} {value:?} (expected a non-negative integer)")]
    InvalidNumber { field: &'static str, value: String },
    #[error("invalid mode {0:?} (expected a 10 character permission string)")]
    InvalidMode(String),
    #[error("empty path")]
    EmptyPath,
    #[error("invalid escape sequence in path {0:?}")]
    InvalidEscape(String),
    #[error("unreadable marker must be used for every unobserved field")]
    PartialUnreadableMarker,
}

#[derive(Debug, thiserror::Error)]
pub enum BaselineLogError {
    #[error("IO error: {0}")]
    Io(std::io::Error),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("Baseline log not found: {0}")]
    NotFound(PathBuf),
    #[error("Cannot create baseline log in {path}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path}:{line}: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        source: LogParseError,
    },
    #[error("{path}:{line}: {source}")]
    Duplicate {
        path: PathBuf,
        line: usize,
        source: RecordSetError,
    },
}

impl BaselineLogError {
    fn from_io(e: std::io::Error, path: &Path) -> Self {
        match e.kind() {
            ErrorKind::PermissionDenied => BaselineLogError::PermissionDenied(path.to_path_buf()),
            ErrorKind::NotFound => BaselineLogError::NotFound(path.to_path_buf()),
            _ => BaselineLogError::Io(e),
        }
    }
}

pub fn format_record(record: &Record) -> String {
    match record {
        Record::Dir(dir) => {
            let path = escape_path(&dir.relative_path);
            match &dir.attrs {
                Ok(attrs) => format!(
                    "{DIR_TAG}  {path}  {}  {}  {}",
                    attrs.uid, attrs.gid, attrs.mode
                ),
                Err(_) => format!("{DIR_TAG}  {path}  -  -  -"),
            }
        }
        Record::File(file) => {
            let path = escape_path(&file.relative_path);
            match &file.content {
                Ok(content) => format!(
                    "{FILE_TAG}  {:08x}  {path}  {}  {}  {}  {}",
                    content.checksum,
                    content.size,
                    content.attrs.uid,
                    content.attrs.gid,
                    content.attrs.mode
                ),
                Err(_) => format!("{FILE_TAG}  -  {path}  -  -  -  -"),
            }
        }
    }
}

/// Parses one (non-blank) log line.
pub fn parse_record(line: &str) -> Result<Record, LogParseError> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let (tag, rest) = split_first_field(line);

    match tag {
        DIR_TAG => {
            let (rest, mode) = split_last_field(rest).ok_or(LogParseError::MissingField(DIR_TAG))?;
            let (rest, gid) = split_last_field(rest).ok_or(LogParseError::MissingField(DIR_TAG))?;
            let (rest, uid) = split_last_field(rest).ok_or(LogParseError::MissingField(DIR_TAG))?;
            let relative_path = parse_path(rest)?;

            let attrs = if [uid, gid, mode].iter().all(|f| *f == UNOBSERVED) {
                Err(unreadable_in_baseline())
            } else {
                Ok(parse_attrs(uid, gid, mode)?)
            };

            Ok(Record::Dir(DirectoryRecord {
                relative_path,
                attrs,
                listing_error: None,
            }))
        }
        FILE_TAG => {
            let (checksum, rest) = split_first_field(rest);
            if checksum.is_empty() {
                return Err(LogParseError::MissingField(FILE_TAG));
            }
            let (rest, mode) =
                split_last_field(rest).ok_or(LogParseError::MissingField(FILE_TAG))?;
            let (rest, gid) = split_last_field(rest).ok_or(LogParseError::MissingField(FILE_TAG))?;
            let (rest, uid) = split_last_field(rest).ok_or(LogParseError::MissingField(FILE_TAG))?;
            let (rest, size) =
                split_last_field(rest).ok_or(LogParseError::MissingField(FILE_TAG))?;
            let relative_path = parse_path(rest)?;

            let fields = [checksum, size, uid, gid, mode];
            let content = if fields.iter().all(|f| *f == UNOBSERVED) {
                Err(unreadable_in_baseline())
            } else if fields.contains(&UNOBSERVED) {
                return Err(LogParseError::PartialUnreadableMarker);
            } else {
                Ok(FileContent {
                    checksum: parse_checksum(checksum)?,
                    size: parse_number(size, "size")?,
                    attrs: parse_attrs(uid, gid, mode)?,
                })
            };

            Ok(Record::File(FileRecord {
                relative_path,
                content,
            }))
        }
        "" => Err(LogParseError::MissingField("any")),
        other => Err(LogParseError::UnknownTag(other.to_string())),
    }
}

fn unreadable_in_baseline() -> ReadError {
    ReadError::new("unreadable when the baseline was recorded")
}

fn parse_attrs(uid: &str, gid: &str, mode: &str) -> Result<EntryAttrs, LogParseError> {
    if [uid, gid, mode].contains(&UNOBSERVED) {
        return Err(LogParseError::PartialUnreadableMarker);
    }
    if mode.len() != MODE_LEN || !mode.is_ascii() {
        return Err(LogParseError::InvalidMode(mode.to_string()));
    }
    Ok(EntryAttrs {
        uid: parse_number(uid, "uid")?,
        gid: parse_number(gid, "gid")?,
        mode: mode.to_string(),
    })
}

fn parse_checksum(value: &str) -> Result<u32, LogParseError> {
    let well_formed = value.len() == 8
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if !well_formed {
        return Err(LogParseError::InvalidChecksum(value.to_string()));
    }
    u32::from_str_radix(value, 16).map_err(|_| LogParseError::InvalidChecksum(value.to_string()))
}

fn parse_number<T: std::str::FromStr>(value: &str, field: &'static str) -> Result<T, LogParseError> {
    let invalid = || LogParseError::InvalidNumber {
        field,
        value: value.to_string(),
    };
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    value.parse().map_err(|_| invalid())
}

fn parse_path(raw: &str) -> Result<String, LogParseError> {
    let raw = raw.trim_matches(|c: char| c.is_ascii_whitespace());
    if raw.is_empty() {
        return Err(LogParseError::EmptyPath);
    }
    unescape_path(raw)
}

fn split_first_field(s: &str) -> (&str, &str) {
    let s = s.trim_start_matches(|c: char| c.is_ascii_whitespace());
    match s.find(|c: char| c.is_ascii_whitespace()) {
        Some(idx) => (&s[..idx], &s[idx..]),
        None => (s, ""),
    }
}

fn split_last_field(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_end_matches(|c: char| c.is_ascii_whitespace());
    let idx = s.rfind(|c: char| c.is_ascii_whitespace())?;
    Some((&s[..idx], &s[idx + 1..]))
}

fn escape_path(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    let last = path.chars().count().saturating_sub(1);
    for (i, c) in path.chars().enumerate() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            ' ' if i == 0 || i == last => escaped.push_str("\\s"),
            c if c.is_ascii_whitespace() => escaped.push_str(&format!("\\x{:02x}", c as u8)),
            c => escaped.push(c),
        }
    }
    escaped
}

fn unescape_path(raw: &str) -> Result<String, LogParseError> {
    let invalid = || LogParseError::InvalidEscape(raw.to_string());
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next().ok_or_else(invalid)? {
            '\\' => out.push('\\'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            's' => out.push(' '),
            'x' => {
                let hex: String = chars.by_ref().take(2).collect();
                if hex.len() != 2 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return Err(invalid());
                }
                let byte = u8::from_str_radix(&hex, 16).map_err(|_| invalid())?;
                if !byte.is_ascii() {
                    return Err(invalid());
                }
                out.push(byte as char);
            }
            _ => return Err(invalid()),
        }
    }
    Ok(out)
}

/// Loads a baseline log into a record set.
///
/// Blank lines are ignored. Any malformed line aborts the load; a baseline
/// that cannot be trusted line-by-line is not compared against.
pub fn read_baseline(path: &Path) -> Result<RecordSet, BaselineLogError> {
    let file = File::open(path).map_err(|e| BaselineLogError::from_io(e, path))?;
    let reader = BufReader::new(file);
    let mut records = RecordSet::new();
    let mut unreadable = 0usize;

    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| BaselineLogError::from_io(e, path))?;
        if line.trim().is_empty() {
            continue;
        }

        let record = parse_record(&line).map_err(|source| BaselineLogError::Parse {
            path: path.to_path_buf(),
            line: index + 1,
            source,
        })?;
        if record.is_unreadable() {
            unreadable += 1;
        }

        records
            .insert(record)
            .map_err(|source| BaselineLogError::Duplicate {
                path: path.to_path_buf(),
                line: index + 1,
                source,
            })?;
    }

    debug!(
        "Parsed baseline {} ({} dirs, {} files, {} unreadable when recorded)",
        path.display(),
        records.dir_count(),
        records.file_count(),
        unreadable
    );

    Ok(records)
}

struct WriterState {
    out: BufWriter<NamedTempFile>,
    lines: u64,
}

/// Streams records into a new baseline log.
///
/// Lines go to a temporary file next to the destination. Only
/// [`BaselineWriter::finish`] syncs it and renames it into place, so a file
/// under the destination name is always a complete baseline.
///
/// Appends are serialized through a mutex; any number of threads may share
/// one writer.
pub struct BaselineWriter {
    destination: PathBuf,
    partial_path: PathBuf,
    state: Mutex<WriterState>,
}

impl BaselineWriter {
    pub fn create(destination: &Path) -> Result<Self, BaselineLogError> {
        let parent = match destination.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let temp_file = tempfile::Builder::new()
            .prefix(PARTIAL_PREFIX)
            .tempfile_in(parent)
            .map_err(|source| BaselineLogError::Create {
                path: parent.to_path_buf(),
                source,
            })?;

        Ok(BaselineWriter {
            destination: destination.to_path_buf(),
            partial_path: temp_file.path().to_path_buf(),
            state: Mutex::new(WriterState {
                out: BufWriter::new(temp_file),
                lines: 0,
            }),
        })
    }

    /// Location of the in-progress file.
    pub fn partial_path(&self) -> &Path {
        &self.partial_path
    }

    pub fn append(&self, record: &Record) -> std::io::Result<()> {
        trace!("Recording {}", record.relative_path());
        let line = format_record(record);
        let mut state = self
            .state
            .lock()
            .map_err(|_| std::io::Error::other("baseline writer lock poisoned"))?;
        writeln!(state.out, "{line}")?;
        state.lines += 1;
        Ok(())
    }

    /// Flushes, syncs and atomically renames the log into place. Returns the
    /// number of lines written.
    pub fn finish(self) -> Result<u64, BaselineLogError> {
        let state = self
            .state
            .into_inner()
            .map_err(|_| BaselineLogError::Io(std::io::Error::other("baseline writer lock poisoned")))?;

        let temp_file = state
            .out
            .into_inner()
            .map_err(|e| BaselineLogError::from_io(e.into_error(), &self.destination))?;

        temp_file
            .as_file()
            .sync_all()
            .map_err(BaselineLogError::Io)?;

        temp_file
            .persist(&self.destination)
            .map_err(|e| BaselineLogError::from_io(e.error, &self.destination))?;

        Ok(state.lines)
    }
}
