// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use uuid::Uuid;

/// Command-line arguments for `harbinger`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "harbinger",
    version,
    about = "Execute a playbook: a graph of dependent C2 and proxy steps.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the playbook file (TOML).
    ///
    /// Default: `Playbook.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Playbook.toml")]
    pub playbook: PathBuf,

    /// Append-only journal to record the run in. Running again with the
    /// same journal and `--run-id` resumes instead of starting over:
    /// finished steps are not run again. Local processes do not outlive the
    /// CLI, so steps that were still running when it stopped end in `error`.
    #[arg(long, value_name = "PATH")]
    pub journal: Option<PathBuf>,

    /// Run id to install the playbook under (random by default).
    #[arg(long, value_name = "UUID")]
    pub run_id: Option<Uuid>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `HARBINGER_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the step graph, but don't execute anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
