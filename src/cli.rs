//! Command line interface.
//!
//! Without a subcommand the worker runs its job loop, which is what the
//! service unit starts.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "vat-worker", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Configuration file (defaults to vat-worker.toml in the working directory).
    #[arg(long, short, global = true, env = "VAT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

impl Cli {
    pub fn subcommand(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Poll the queue and process jobs until interrupted.
    Run,

    /// Publish the latest tag of the project repository as the current code release.
    Release,

    /// Classify a saved tool log and print its warnings and errors.
    Classify {
        /// Path to the log file.
        log: PathBuf,

        /// Exit code the tool finished with.
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        exit_code: i32,
    },
}
