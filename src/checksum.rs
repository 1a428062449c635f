use crc32fast::Hasher;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Files are read in chunks of this size so peak memory per worker stays
/// constant regardless of file size.
pub const CHUNK_SIZE: usize = 1 << 20;

#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    #[error("IO error: {0}")]
    Io(std::io::Error),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("File modified during checksumming: {0}")]
    ConcurrentModification(PathBuf),
}

impl ChecksumError {
    fn from_io(e: std::io::Error, path: &Path) -> Self {
        if e.kind() == ErrorKind::PermissionDenied {
            ChecksumError::PermissionDenied(path.to_path_buf())
        } else {
            ChecksumError::Io(e)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileChecksum {
    pub crc32: u32,
    /// Number of bytes folded into `crc32`.
    pub size: u64,
}

/// Folds everything `reader` yields into a running CRC32, one buffer-full at
/// a time.
///
/// The result only depends on the byte stream, never on `buffer.len()`.
pub fn checksum_reader<R: Read>(
    reader: &mut R,
    buffer: &mut [u8],
) -> std::io::Result<FileChecksum> {
    let mut hasher = Hasher::new();
    let mut size = 0u64;

    loop {
        let bytes_read = match reader.read(buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..bytes_read]);
        size += bytes_read as u64;
    }

    Ok(FileChecksum {
        crc32: hasher.finalize(),
        size,
    })
}

/// Computes file checksums, reusing one chunk buffer across files.
///
/// Each pool worker owns one `Checksummer`.
pub struct Checksummer {
    buffer: Vec<u8>,
}

impl Default for Checksummer {
    fn default() -> Self {
        Self::with_chunk_size(CHUNK_SIZE)
    }
}

impl Checksummer {
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Checksummer {
            buffer: vec![0u8; chunk_size.max(1)],
        }
    }

    /// Computes the CRC32 of a file with concurrent modification detection.
    ///
    /// # Behavior
    /// - Records the file's modification time and length before reading
    /// - Reads the file in chunks and folds them into a CRC32
    /// - Verifies neither modification time nor length changed after reading
    ///
    /// # Errors
    /// - `ChecksumError::Io`: File doesn't exist, vanished or other I/O errors
    /// - `ChecksumError::PermissionDenied`: Insufficient permissions to read the file
    /// - `ChecksumError::ConcurrentModification`: The file was detected as being
    ///   modified while checksumming. The absence of this error is *not* a
    ///   guarantee that the file was not modified.
    pub fn checksum_file(&mut self, path: &Path) -> Result<FileChecksum, ChecksumError> {
        let mut file = File::open(path).map_err(|e| ChecksumError::from_io(e, path))?;

        let before = file.metadata().map_err(ChecksumError::Io)?;
        let mtime_before = before.modified().map_err(ChecksumError::Io)?;

        let checksum = checksum_reader(&mut file, &mut self.buffer)
            .map_err(|e| ChecksumError::from_io(e, path))?;

        let after = std::fs::metadata(path).map_err(|e| ChecksumError::from_io(e, path))?;
        let mtime_after = after.modified().map_err(ChecksumError::Io)?;

        if mtime_before != mtime_after || after.len() != checksum.size {
            return Err(ChecksumError::ConcurrentModification(path.to_path_buf()));
        }

        debug!(
            "Checksum of {} is {:08x} ({} bytes)",
            path.display(),
            checksum.crc32,
            checksum.size
        );

        Ok(checksum)
    }
}
