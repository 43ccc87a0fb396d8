//! PCS - per-call-stack trace replay
//!
//! Reads a textual dump of call stack transitions, replays it through
//! [`PerCallStack`], and summarizes what each call stack did while it was
//! alive.
//!
//! # Example
//!
//! ```ignore
//! use pcs::{ReplayConfig, replay_file};
//!
//! let report = replay_file("trace.txt", &ReplayConfig::default())?;
//! for stack in &report.stacks {
//!     println!("{:#x}: {} accesses", stack.tag, stack.accesses);
//! }
//! ```

// Re-export the tracker
pub use pcs_core::{
    CallStackError, CallStackState, DEFAULT_MAX_CPUS, FcallEntry, FcallState, PerCallStack,
    Transition,
};

pub mod metrics;
mod parse;
mod replay;
mod stats;

pub use parse::{Access, Record, TraceReader, parse_line};
pub use replay::{ReplayConfig, ReplayReport, Replayer, replay_file, replay_reader};
pub use stats::{EndReason, StackStats, StackSummary};

use thiserror::Error;

/// Replay errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("line {line}: {source}")]
    Replay {
        line: usize,
        #[source]
        source: CallStackError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
