// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `testrelay`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "testrelay",
    version,
    about = "Drive a long-lived test worker: discover, run and watch tests.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Testrelay.toml")]
    pub config: String,

    /// Keep running: register a continuous run and forward file changes to
    /// the worker until Ctrl-C.
    #[arg(long)]
    pub watch: bool,

    /// Collect coverage for the run.
    #[arg(long)]
    pub coverage: bool,

    /// Update snapshots instead of comparing against them.
    #[arg(long)]
    pub update_snapshots: bool,

    /// Only run test files whose path contains this substring.
    #[arg(long, value_name = "SUBSTRING")]
    pub filter: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TESTRELAY_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Print the discovered test files and exit without running anything.
    #[arg(long)]
    pub list: bool,
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

pub fn parse() -> CliArgs {
    CliArgs::parse()
}
