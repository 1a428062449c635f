use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod help_text;

/// Baseline and verify large directory trees
#[derive(Parser, Debug)]
#[command(name = "treecheck", version, about, long_about = help_text::ROOT_LONG_ABOUT)]
pub struct Cli {
    /// Change to directory before operating
    #[arg(short = 'C', value_name = "DIRECTORY", global = true)]
    pub directory: Option<PathBuf>,

    /// Read scan settings from a TOML file
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug). Takes precedence over RUST_LOG.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Set the log level explicitly. Takes precedence over RUST_LOG.
    #[arg(
        long,
        value_name = "LEVEL",
        global = true,
        conflicts_with = "verbose"
    )]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Walk a tree and record its baseline log
    #[command(long_about = help_text::BASELINE_LONG_ABOUT)]
    Baseline {
        /// Directory to scan
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,

        #[command(flatten)]
        scan: ScanArgs,
    },

    /// Compare a tree against its baseline log
    #[command(long_about = help_text::VERIFY_LONG_ABOUT)]
    Verify {
        /// Directory to verify
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,

        #[command(flatten)]
        scan: ScanArgs,

        /// Flag files currently owned by uid or gid 65534 (nobody)
        #[arg(long)]
        check_idmap: bool,

        /// Flag files currently owned by uid or gid 0 (root)
        #[arg(long)]
        check_root: bool,

        /// Only compare existence, checksum and size
        #[arg(long)]
        content_only: bool,
    },
}

#[derive(Args, Debug, Default)]
pub struct ScanArgs {
    /// Number of checksum worker threads [default: 4]
    #[arg(short = 'j', long, value_name = "N")]
    pub threads: Option<usize>,

    /// Maximum number of files waiting for a worker [default: 2 x threads]
    #[arg(long, value_name = "N")]
    pub queue_depth: Option<usize>,

    /// Baseline log location [default: <PATH>/.integrity_hash.log]
    #[arg(long, value_name = "FILE")]
    pub log: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn verify_flags_parse() {
        let cli = Cli::try_parse_from([
            "treecheck",
            "verify",
            "/data",
            "-j",
            "8",
            "--check-idmap",
            "--log",
            "/tmp/x.log",
        ])
        .unwrap();

        match cli.command {
            Command::Verify {
                path,
                scan,
                check_idmap,
                check_root,
                content_only,
            } => {
                assert_eq!(path, Some(PathBuf::from("/data")));
                assert_eq!(scan.threads, Some(8));
                assert_eq!(scan.log, Some(PathBuf::from("/tmp/x.log")));
                assert!(check_idmap);
                assert!(!check_root);
                assert!(!content_only);
            }
            other => panic!("Expected verify, got {other:?}"),
        }
    }

    #[test]
    fn log_level_conflicts_with_verbose() {
        let result = Cli::try_parse_from(["treecheck", "-v", "--log-level", "info", "baseline"]);
        assert!(result.is_err());
    }
}
