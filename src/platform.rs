//! Ownership and permission metadata for filesystem entries.
//!
//! On Unix the raw numeric uid/gid and the `ls -l` style mode string are
//! used. Other platforms get fixed placeholders so that logs produced there
//! still parse and compare consistently.

use crate::record::EntryAttrs;
use std::fs::Metadata;

/// Mode string used where POSIX permissions are unavailable.
#[cfg_attr(unix, allow(dead_code))]
pub const MODE_PLACEHOLDER: &str = "----------";

#[cfg(unix)]
pub fn entry_attrs(metadata: &Metadata) -> EntryAttrs {
    use std::os::unix::fs::MetadataExt;

    EntryAttrs {
        uid: metadata.uid(),
        gid: metadata.gid(),
        mode: symbolic_mode(metadata.mode()),
    }
}

#[cfg(not(unix))]
pub fn entry_attrs(_metadata: &Metadata) -> EntryAttrs {
    EntryAttrs {
        uid: 0,
        gid: 0,
        mode: MODE_PLACEHOLDER.to_string(),
    }
}

/// Renders raw `st_mode` bits as a ten character string such as `drwxr-sr-x`.
#[cfg(unix)]
pub fn symbolic_mode(mode: u32) -> String {
    let file_type = match mode & libc::S_IFMT as u32 {
        m if m == libc::S_IFDIR as u32 => 'd',
        m if m == libc::S_IFREG as u32 => '-',
        m if m == libc::S_IFLNK as u32 => 'l',
        m if m == libc::S_IFCHR as u32 => 'c',
        m if m == libc::S_IFBLK as u32 => 'b',
        m if m == libc::S_IFIFO as u32 => 'p',
        m if m == libc::S_IFSOCK as u32 => 's',
        _ => '?',
    };

    let bit = |mask: u32, c: char| if mode & mask != 0 { c } else { '-' };
    // Execute slot doubles as the setuid/setgid/sticky indicator.
    let exec = |exec_mask: u32, special_mask: u32, set: char, unset: char| {
        match (mode & exec_mask != 0, mode & special_mask != 0) {
            (true, true) => set,
            (false, true) => unset,
            (true, false) => 'x',
            (false, false) => '-',
        }
    };

    [
        file_type,
        bit(0o400, 'r'),
        bit(0o200, 'w'),
        exec(0o100, libc::S_ISUID as u32, 's', 'S'),
        bit(0o040, 'r'),
        bit(0o020, 'w'),
        exec(0o010, libc::S_ISGID as u32, 's', 'S'),
        bit(0o004, 'r'),
        bit(0o002, 'w'),
        exec(0o001, libc::S_ISVTX as u32, 't', 'T'),
    ]
    .iter()
    .collect()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::{MetadataExt, PermissionsExt};
    use tempfile::TempDir;

    #[test]
    fn renders_common_modes() {
        assert_eq!(symbolic_mode(0o100644), "-rw-r--r--");
        assert_eq!(symbolic_mode(0o040755), "drwxr-xr-x");
        assert_eq!(symbolic_mode(0o120777), "lrwxrwxrwx");
        assert_eq!(symbolic_mode(0o010600), "prw-------");
    }

    #[test]
    fn renders_special_bits() {
        assert_eq!(symbolic_mode(0o104755), "-rwsr-xr-x");
        assert_eq!(symbolic_mode(0o104644), "-rwSr--r--");
        assert_eq!(symbolic_mode(0o042750), "drwxr-s---");
        assert_eq!(symbolic_mode(0o041777), "drwxrwxrwt");
        assert_eq!(symbolic_mode(0o041776), "drwxrwxrwT");
    }

    #[test]
    fn reads_attrs_from_metadata() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("file.txt");
        fs::write(&path, "content").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();

        let metadata = fs::symlink_metadata(&path).unwrap();
        let attrs = entry_attrs(&metadata);

        assert_eq!(attrs.mode, "-rw-r-----");
        assert_eq!(attrs.uid, metadata.uid());
        assert_eq!(attrs.gid, metadata.gid());
    }
}
