//! CLI definitions and argument types.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use pcs::{DEFAULT_MAX_CPUS, ReplayConfig};

/// Exit code for success.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for failure.
pub const EXIT_FAILURE: i32 = 1;

#[derive(Parser)]
#[command(name = "pcs")]
#[command(about = "Per-call-stack trace replay - reconstructs which call stack runs on each CPU")]
#[command(version)]
pub struct Cli {
    /// Show metrics summary after execution
    #[arg(long, global = true)]
    pub metrics: bool,

    /// Enable verbose output (sets RUST_LOG=debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output (only show errors)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub silent: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Replay a trace dump and summarize every call stack
    Replay {
        /// Trace dump (plain text, or zstd-compressed with a .zst extension)
        #[arg(value_name = "TRACE")]
        input: PathBuf,

        #[command(flatten)]
        replay: ReplayArgs,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Check that a trace dump follows the call stack protocol
    Check {
        /// Trace dump (plain text, or zstd-compressed with a .zst extension)
        #[arg(value_name = "TRACE")]
        input: PathBuf,

        #[command(flatten)]
        replay: ReplayArgs,
    },
}

/// Replay configuration arguments.
#[derive(clap::Args, Clone, Debug)]
pub struct ReplayArgs {
    /// Number of CPUs in the traced system
    #[arg(long, default_value_t = DEFAULT_MAX_CPUS)]
    pub cpus: usize,

    /// Leave call stacks that are still alive at the end of the trace unreported
    #[arg(long)]
    pub no_flush: bool,
}

impl ReplayArgs {
    pub const fn config(&self) -> ReplayConfig {
        ReplayConfig {
            num_cpus: self.cpus,
            flush_at_eof: !self.no_flush,
        }
    }
}

/// Output format for the replay report.
#[derive(Clone, Copy, Debug, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable output (default)
    #[default]
    Text,
    /// Raw key-value output (for scripting)
    Raw,
    /// JSON output
    Json,
}
