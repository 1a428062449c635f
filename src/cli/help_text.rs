pub(super) const ROOT_LONG_ABOUT: &str = "\
Baseline and verify large directory trees

Treecheck detects unintended change to a directory tree (corruption, accidental
deletion, permission drift). It records a CRC32 checksum, size, owner, group and
permission string for every file, and owner, group and permissions for every
directory, into a single plain-text baseline log. Verifying walks the tree again
and reports every difference by category.

CRC32 is a fast accidental-change detector. It is not a cryptographic digest and
offers no protection against deliberate tampering.

TYPICAL WORKFLOW:

  1. Record a baseline:
     $ treecheck baseline /export/shared

     The log is written to /export/shared/.integrity_hash.log unless --log is
     given. It only appears under its final name once the walk has completed.

  2. Later, verify the tree against it:
     $ treecheck verify /export/shared

COMMANDS:

  baseline
    Walk the tree, checksum every regular file with a pool of worker threads
    and write the baseline log.

  verify
    Walk the tree again and compare it with an existing baseline log. Exits
    with status 1 when anything is missing, extra, unreadable or mismatched.

GLOBAL OPTIONS:

  -C <DIRECTORY>
    Change to directory before operating (like git -C or make -C).

  --config <FILE>
    Read scan settings from a TOML file. Command line flags win over the file.

CONFIGURATION FILE:

  [scan]
  path = \"/export/shared\"
  threads = 8
  queue_depth = 16
  log = \"/var/lib/treecheck/shared.log\"

  [verify]
  check_idmap = true
  check_root = false
  content_only = false

  Relative paths are resolved against the directory holding the file.

EXIT STATUS:

  0    Success (verify: no discrepancies)
  1    Verify found discrepancies
  255  Error (unreadable root, missing or malformed baseline log, I/O failure)
";

pub(super) const BASELINE_LONG_ABOUT: &str = "\
Record a baseline of a directory tree

Walks PATH depth-first without following symlinks. Every directory is written to
the log as soon as it is listed; every regular file is checksummed by one of
--threads workers and written when its checksum completes. Symlinks, FIFOs,
sockets and device nodes are skipped. PATH itself is not recorded.

LOG FORMAT:

  DIR   <relative_path>  <uid>  <gid>  <mode>
  FILE  <crc32_hex8>  <relative_path>  <size>  <uid>  <gid>  <mode>

  Entries that could not be read are recorded with '-' in place of every value
  that could not be observed, so that verify still accounts for them.

BACKPRESSURE:

  At most --queue-depth files wait for a worker at any time (default: twice the
  worker count). Memory use does not grow with the size of the tree.

EXAMPLES:

  $ treecheck baseline /data --threads 16
  $ treecheck baseline /data --log /var/lib/treecheck/data.log
";

pub(super) const VERIFY_LONG_ABOUT: &str = "\
Verify a directory tree against its baseline

Reads the baseline log, walks PATH again, and reconciles the two by path.
Every differing field is reported in its own category, so a file whose content
and permissions both changed is listed under both.

CATEGORIES:

  Missing / extra directories and files
  Unreadable directories and files (excluded from field comparison)
  Directories with UID, GID or Mode mismatches
  Files with CRC32, Size, UID, GID or Mode mismatches
  Paths that changed type (directory <-> file)

ADVISORY CHECKS (reported, but do not fail verification):

  --check-idmap    Files now owned by uid or gid 65534 (nobody), which usually
                   means an NFS id mapping problem.
  --check-root     Files now owned by uid or gid 0, e.g. after root squash
                   was disabled.

A summary with elapsed time and directory/file counts on both sides is always
printed, even when errors occurred.

EXAMPLES:

  $ treecheck verify /data
  $ treecheck verify /data --check-idmap --check-root
  $ treecheck verify /mnt/copy --log /data/.integrity_hash.log --content-only
";
