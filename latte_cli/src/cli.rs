//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "latte", version, about = "Espresso machine host controller")]
pub struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE", default_value = "etc/latte.toml")]
    pub config: PathBuf,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the machine control loop
    Run {
        /// Drive the simulated controller instead of the serial link
        #[arg(long, action = ArgAction::SetTrue)]
        sim: bool,

        /// Stop after this many cycles (default: run until ctrl-c)
        #[arg(long, value_name = "N")]
        cycles: Option<u64>,

        /// Override the brew log output directory
        #[arg(long = "brew-log", value_name = "DIR")]
        brew_log: Option<PathBuf>,
    },
    /// Load and validate the config, printing the effective values
    Check,
}
