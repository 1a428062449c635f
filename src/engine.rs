//! Baseline and verify runs: configuration in, summary or report out.

use crate::baseline_log::{self, BaselineLogError, BaselineWriter};
use crate::config::ScanConfig;
use crate::reconcile::{self, Report};
use crate::record::RecordSet;
use crate::walker::{self, WalkError, WalkStats};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Walk(#[from] WalkError),
    #[error(transparent)]
    BaselineLog(#[from] BaselineLogError),
    #[error("Collected records lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, Copy)]
pub struct RunTiming {
    pub started_at: DateTime<Local>,
    pub elapsed: Duration,
}

struct Stopwatch {
    started_at: DateTime<Local>,
    start: Instant,
}

impl Stopwatch {
    fn start() -> Self {
        Stopwatch {
            started_at: Local::now(),
            start: Instant::now(),
        }
    }

    fn stop(self) -> RunTiming {
        RunTiming {
            started_at: self.started_at,
            elapsed: self.start.elapsed(),
        }
    }
}

#[derive(Debug)]
pub struct BaselineSummary {
    pub log_path: PathBuf,
    pub timing: RunTiming,
    pub stats: WalkStats,
    pub lines: u64,
}

#[derive(Debug)]
pub struct VerifyOutcome {
    pub report: Report,
    pub timing: RunTiming,
    pub stats: WalkStats,
}

/// Walks the configured root and writes a new baseline log.
///
/// The log only appears under its final name if the walk completes. Any
/// existing log at that location is replaced.
pub fn run_baseline(config: &ScanConfig) -> Result<BaselineSummary, RunError> {
    let stopwatch = Stopwatch::start();
    walker::canonical_root(&config.root)?;

    let writer = BaselineWriter::create(&config.log_path)?;
    debug!("Streaming baseline into {}", writer.partial_path().display());

    let excluded = [config.log_path.as_path(), writer.partial_path()]
        .into_iter()
        .filter_map(absolute_path)
        .collect();
    let stats = walker::walk_tree(&config.root, &config.walk_options(excluded), &writer)?;
    // On error the writer is dropped here and its partial file removed.
    let lines = writer.finish()?;

    info!(
        "Baseline written to {} ({} lines)",
        config.log_path.display(),
        lines
    );

    Ok(BaselineSummary {
        log_path: config.log_path.clone(),
        timing: stopwatch.stop(),
        stats,
        lines,
    })
}

/// Walks the configured root and reconciles it against the baseline log.
pub fn run_verify(config: &ScanConfig) -> Result<VerifyOutcome, RunError> {
    let stopwatch = Stopwatch::start();
    walker::canonical_root(&config.root)?;

    let baseline = baseline_log::read_baseline(&config.log_path)?;
    info!(
        "Loaded baseline {} ({} dirs, {} files)",
        config.log_path.display(),
        baseline.dir_count(),
        baseline.file_count()
    );

    let collector = Mutex::new(RecordSet::new());
    let excluded = absolute_path(&config.log_path).into_iter().collect();
    let stats = walker::walk_tree(&config.root, &config.walk_options(excluded), &collector)?;
    let current = collector.into_inner().map_err(|_| RunError::Poisoned)?;

    let report = reconcile::reconcile(&baseline, &current, &config.reconcile_options());

    Ok(VerifyOutcome {
        report,
        timing: stopwatch.stop(),
        stats,
    })
}

/// Absolute form of `path` as the walker would see it, with the parent
/// directory canonicalized. `None` when the parent does not resolve, in which
/// case the path cannot be inside the walked tree either.
fn absolute_path(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let parent = parent.canonicalize().ok()?;
    Some(parent.join(name))
}
