use crate::baseline_log::DEFAULT_LOG_NAME;
use crate::reconcile::ReconcileOptions;
use crate::walker::{DEFAULT_WORKERS, QUEUE_DEPTH_PER_WORKER, WalkOptions};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(std::io::Error),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Worker count must be at least 1")]
    InvalidWorkers,
    #[error("Queue depth must be at least 1")]
    InvalidQueueDepth,
}

/// Resolved settings for one baseline or verify run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    pub root: PathBuf,
    pub workers: usize,
    pub queue_depth: usize,
    pub log_path: PathBuf,
    pub check_idmap: bool,
    pub check_root: bool,
    pub content_only: bool,
}

impl ScanConfig {
    /// Default settings for scanning `root`.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        ScanConfig {
            log_path: root.join(DEFAULT_LOG_NAME),
            root,
            workers: DEFAULT_WORKERS,
            queue_depth: DEFAULT_WORKERS * QUEUE_DEPTH_PER_WORKER,
            check_idmap: false,
            check_root: false,
            content_only: false,
        }
    }

    pub fn walk_options(&self, excluded: Vec<PathBuf>) -> WalkOptions {
        WalkOptions {
            workers: self.workers,
            queue_depth: self.queue_depth,
            excluded,
        }
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            check_idmap: self.check_idmap,
            check_root: self.check_root,
            content_only: self.content_only,
        }
    }
}

/// On-disk configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub scan: ScanSection,
    #[serde(default)]
    pub verify: VerifySection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScanSection {
    pub path: Option<PathBuf>,
    pub threads: Option<usize>,
    pub queue_depth: Option<usize>,
    pub log: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifySection {
    pub check_idmap: Option<bool>,
    pub check_root: Option<bool>,
    pub content_only: Option<bool>,
}

impl ConfigFile {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Loads a config file. Relative paths inside it are resolved against
    /// the directory containing the file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => ConfigError::PermissionDenied(path.to_path_buf()),
            std::io::ErrorKind::NotFound => ConfigError::NotFound(path.to_path_buf()),
            _ => ConfigError::Io(e),
        })?;

        let mut config = Self::from_toml(&content)?;
        let base = path.parent().unwrap_or(Path::new(""));
        config.scan.path = config.scan.path.map(|p| base.join(p));
        config.scan.log = config.scan.log.map(|p| base.join(p));
        Ok(config)
    }
}

/// Values given on the command line. `None` and `false` defer to the config
/// file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub path: Option<PathBuf>,
    pub threads: Option<usize>,
    pub queue_depth: Option<usize>,
    pub log: Option<PathBuf>,
    pub check_idmap: bool,
    pub check_root: bool,
    pub content_only: bool,
}

/// Merges command line values over the config file over the defaults.
pub fn resolve(file: &ConfigFile, overrides: Overrides) -> Result<ScanConfig, ConfigError> {
    let root = overrides
        .path
        .or_else(|| file.scan.path.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    let mut config = ScanConfig::for_root(root);

    if let Some(workers) = overrides.threads.or(file.scan.threads) {
        if workers == 0 {
            return Err(ConfigError::InvalidWorkers);
        }
        config.workers = workers;
        config.queue_depth = workers * QUEUE_DEPTH_PER_WORKER;
    }

    if let Some(depth) = overrides.queue_depth.or(file.scan.queue_depth) {
        if depth == 0 {
            return Err(ConfigError::InvalidQueueDepth);
        }
        config.queue_depth = depth;
    }

    if let Some(log) = overrides.log.or_else(|| file.scan.log.clone()) {
        config.log_path = log;
    }

    config.check_idmap = overrides.check_idmap || file.verify.check_idmap.unwrap_or(false);
    config.check_root = overrides.check_root || file.verify.check_root.unwrap_or(false);
    config.content_only = overrides.content_only || file.verify.content_only.unwrap_or(false);

    Ok(config)
}
