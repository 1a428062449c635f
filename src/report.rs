//! Plain-text rendering of baseline summaries and verify reports.

use crate::engine::{BaselineSummary, RunTiming};
use crate::reconcile::{Category, Report};

const RULE: &str = "----------------";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn title(category: Category) -> &'static str {
    match category {
        Category::MissingDirs => "Missing directories (in baseline but not on disk)",
        Category::ExtraDirs => "Extra directories (on disk but not in baseline)",
        Category::UnreadableDirs => "Unreadable directories",
        Category::DirUidMismatch => "Directories with UID mismatches",
        Category::DirGidMismatch => "Directories with GID mismatches",
        Category::DirModeMismatch => "Directories with Mode mismatches",
        Category::MissingFiles => "Missing files (in baseline but not on disk)",
        Category::ExtraFiles => "Extra files (on disk but not in baseline)",
        Category::UnreadableFiles => "Unreadable files",
        Category::ChecksumMismatch => "Files with CRC32 mismatches",
        Category::SizeMismatch => "Files with Size mismatches",
        Category::FileUidMismatch => "Files with UID mismatches",
        Category::FileGidMismatch => "Files with GID mismatches",
        Category::FileModeMismatch => "Files with Mode mismatches",
        Category::TypeMismatch => "Paths that changed type (directory <-> file)",
        Category::IdMapping => "Files flagged for ID mapping issues (UID/GID=65534)",
        Category::RootOwnership => "Files flagged for root ownership (UID/GID=0)",
    }
}

fn marker(category: Category) -> char {
    match category {
        Category::MissingDirs | Category::MissingFiles => '-',
        Category::ExtraDirs | Category::ExtraFiles => '+',
        Category::UnreadableDirs | Category::UnreadableFiles => '!',
        Category::IdMapping | Category::RootOwnership => '?',
        _ => '~',
    }
}

fn timing_lines(timing: &RunTiming, width: usize) -> [String; 2] {
    [
        format!(
            "{:<width$}: {}",
            "Start time",
            timing.started_at.format(TIME_FORMAT)
        ),
        format!(
            "{:<width$}: {:.2} seconds",
            "Elapsed time",
            timing.elapsed.as_secs_f64()
        ),
    ]
}

fn render(lines: Vec<String>) -> String {
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Summary block followed by every non-empty category in a fixed order.
pub fn format_verify_report(report: &Report, timing: &RunTiming) -> String {
    const WIDTH: usize = 14;
    let counts = &report.counts;

    let mut lines = vec!["--- Summary ---".to_string()];
    lines.extend(timing_lines(timing, WIDTH));
    lines.push(format!("{:<WIDTH$}: {}", "Dirs baseline", counts.baseline_dirs));
    lines.push(format!("{:<WIDTH$}: {}", "Dirs current", counts.current_dirs));
    lines.push(format!("{:<WIDTH$}: {}", "Files baseline", counts.baseline_files));
    lines.push(format!("{:<WIDTH$}: {}", "Files current", counts.current_files));
    lines.push(RULE.to_string());

    for category in Category::ALL {
        let paths = report.paths(category);
        if paths.is_empty() {
            continue;
        }
        lines.push(String::new());
        lines.push(format!("{}:", title(category)));
        let marker = marker(category);
        lines.extend(paths.iter().map(|path| format!("  {marker} {path}")));
    }

    if report.has_discrepancies() {
        lines.push(RULE.to_string());
    }

    render(lines)
}

pub fn format_baseline_summary(summary: &BaselineSummary) -> String {
    const WIDTH: usize = 12;
    let stats = &summary.stats;

    let mut lines = vec![
        format!("Baseline written to {}", summary.log_path.display()),
        "--- Summary ---".to_string(),
    ];
    lines.extend(timing_lines(&summary.timing, WIDTH));
    lines.push(format!("{:<WIDTH$}: {}", "Total dirs", stats.directories));
    lines.push(format!("{:<WIDTH$}: {}", "Total files", stats.files));
    lines.push(format!("{:<WIDTH$}: {}", "Unreadable", stats.unreadable));
    lines.push(format!("{:<WIDTH$}: {}", "Skipped", stats.skipped));
    lines.push(format!("{:<WIDTH$}: {}", "Records", summary.lines));
    lines.push(RULE.to_string());

    render(lines)
}
