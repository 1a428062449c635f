use assert_cmd::{Command, cargo::cargo_bin_cmd};
use std::fs;
use std::path::Path;

pub fn treecheck_cmd(cwd: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("treecheck");
    cmd.arg("-C").arg(cwd);
    cmd
}

/// Creates `files` (relative path, content) below `root`, including parent
/// directories.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (path, content) in files {
        let path = root.join(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }
}

// Not every test crate records a baseline through this helper.
#[allow(dead_code)]
pub fn baseline(cwd: &Path) {
    treecheck_cmd(cwd).arg("baseline").assert().success();
}
