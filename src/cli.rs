// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `watchpipe`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "watchpipe",
    version,
    about = "Watch files and run a pipeline of tasks over what changed.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Watchpipe.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Watchpipe.toml")]
    pub config: String,

    /// Scan once, run the pipeline once, exit. No watching.
    ///
    /// The exit status is non-zero when the run fails.
    #[arg(long)]
    pub once: bool,

    /// Override `[worker_pool].pool_size`.
    #[arg(long, value_name = "N")]
    pub pool_size: Option<usize>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `WATCHPIPE_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Load and validate the config, print the pipeline, then exit.
    #[arg(long)]
    pub dry_run: bool,
}

/// Values accepted by `--log-level`.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Parse `std::env::args`, exiting with usage on error.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
