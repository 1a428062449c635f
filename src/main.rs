mod baseline_log;
mod checksum;
mod cli;
mod config;
mod engine;
mod platform;
mod reconcile;
mod record;
mod report;
mod walker;

use cli::{Cli, Command, LogLevel, ScanArgs};
use config::{ConfigFile, Overrides};
use std::fmt as stdfmt;
use std::io::{IsTerminal, stderr};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{Event, Level, Subscriber, error, info, warn};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt as tracing_fmt;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;

struct TreecheckExitCode;

impl TreecheckExitCode {
    /// Exit code used when verification found discrepancies.
    fn discrepancies() -> ExitCode {
        ExitCode::from(1)
    }

    /// Exit code used for other errors (I/O errors, invalid arguments, etc.).
    fn any_error() -> ExitCode {
        ExitCode::from(255)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.log_level);

    // Change working directory if -C was specified
    if let Some(directory) = &cli.directory
        && let Err(e) = std::env::set_current_dir(directory)
    {
        error!(
            "Failed to change directory to {}: {}",
            directory.display(),
            e
        );
        return TreecheckExitCode::any_error();
    }

    let result: anyhow::Result<ExitCode> = match cli.command {
        Command::Baseline { path, scan } => {
            handle_baseline(cli.config.as_deref(), scan_overrides(path, scan))
        }
        Command::Verify {
            path,
            scan,
            check_idmap,
            check_root,
            content_only,
        } => handle_verify(
            cli.config.as_deref(),
            Overrides {
                check_idmap,
                check_root,
                content_only,
                ..scan_overrides(path, scan)
            },
        ),
    };

    match result {
        Ok(exit_code) => exit_code,
        Err(err) => {
            error!("{err}");
            TreecheckExitCode::any_error()
        }
    }
}

fn scan_overrides(path: Option<PathBuf>, scan: ScanArgs) -> Overrides {
    Overrides {
        path,
        threads: scan.threads,
        queue_depth: scan.queue_depth,
        log: scan.log,
        ..Overrides::default()
    }
}

fn load_config(path: Option<&Path>, overrides: Overrides) -> anyhow::Result<config::ScanConfig> {
    let file = match path {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::default(),
    };
    Ok(config::resolve(&file, overrides)?)
}

fn handle_baseline(config_path: Option<&Path>, overrides: Overrides) -> anyhow::Result<ExitCode> {
    let config = load_config(config_path, overrides)?;

    let summary = engine::run_baseline(&config)?;
    print!("{}", report::format_baseline_summary(&summary));

    if summary.stats.unreadable > 0 {
        warn!(
            "{} entries could not be read and were recorded as unreadable",
            summary.stats.unreadable
        );
    }

    Ok(ExitCode::SUCCESS)
}

fn handle_verify(config_path: Option<&Path>, overrides: Overrides) -> anyhow::Result<ExitCode> {
    let config = load_config(config_path, overrides)?;

    let outcome = engine::run_verify(&config)?;
    print!(
        "{}",
        report::format_verify_report(&outcome.report, &outcome.timing)
    );

    if !outcome.report.has_discrepancies() {
        info!("Verification successful: No changes or corruption detected");
        return Ok(ExitCode::SUCCESS);
    }

    error!("Verification failed: tree differs from baseline");
    Ok(TreecheckExitCode::discrepancies())
}

/// Picks the filter directive. Explicit flags win over RUST_LOG, which wins
/// over the `warn` default.
fn filter_directive(verbose: u8, log_level: Option<LogLevel>) -> Option<&'static str> {
    if let Some(level) = log_level {
        return Some(level.as_filter());
    }
    match verbose {
        0 => None,
        1 => Some("info"),
        _ => Some("debug"),
    }
}

fn init_tracing(verbose: u8, log_level: Option<LogLevel>) {
    let stderr_is_terminal = stderr().is_terminal();
    let formatter = EmojiFormatter { stderr_is_terminal };

    let filter = match filter_directive(verbose, log_level) {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };

    let fmt_layer = tracing_fmt::layer()
        .event_format(formatter)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

struct EmojiFormatter {
    stderr_is_terminal: bool,
}

impl<S, N> FormatEvent<S, N> for EmojiFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        if self.stderr_is_terminal {
            match *event.metadata().level() {
                Level::DEBUG => write!(writer, "🔍 ")?,
                Level::INFO => write!(writer, "ℹ️ ")?,
                Level::WARN => write!(writer, "⚠️  ")?,
                Level::ERROR => write!(writer, "❌️ ")?,
                _ => {}
            }
        } else {
            match *event.metadata().level() {
                Level::DEBUG => writer.write_str("DEBUG: ")?,
                Level::INFO => writer.write_str("INFO: ")?,
                Level::WARN => writer.write_str("WARN: ")?,
                Level::ERROR => writer.write_str("ERROR: ")?,
                _ => {}
            }
        }

        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
