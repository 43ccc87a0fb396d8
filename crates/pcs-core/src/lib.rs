//! Per-CPU call stack tracking for trace replay.
//!
//! A trace names logical call stacks by an opaque 64-bit tag. Each call
//! stack starts on a CPU, may be paused (the CPU moves on while the stack
//! survives), resumed on any CPU, and finally terminates. `PerCallStack`
//! reconstructs which call stack is current on each CPU and owns one
//! payload per live call stack.
//!
//! ```ignore
//! use pcs_core::{CallStackState, FcallEntry, FcallState, PerCallStack};
//!
//! struct Depth(u16);
//!
//! impl CallStackState for Depth {
//!     type Args = ();
//!     fn new(entry: &FcallEntry, (): ()) -> Self {
//!         Self(entry.depth)
//!     }
//! }
//!
//! let mut stacks = PerCallStack::<Depth>::with_cpus(4);
//! stacks.handle(&FcallEntry::new(0, 0x10, FcallState::Start), ())?;
//! assert!(stacks.current(0).is_some());
//! ```

mod entry;
mod tracker;

pub use entry::{FcallEntry, FcallState};
pub use tracker::{CallStackState, DEFAULT_MAX_CPUS, PerCallStack, Transition};

use thiserror::Error;

/// Call stack protocol violations.
///
/// Every variant means the transition stream disagrees with the call stack
/// state machine. None of them are recoverable: replay must stop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallStackError {
    #[error("cannot start call stack {tag:#x}; already exists")]
    AlreadyExists { tag: u64 },
    #[error(
        "cannot {verb} call stack {tag:#x}; cpu {cpu} already has call stack {occupant:#x}",
        verb = .op.verb()
    )]
    CpuBusy {
        op: FcallState,
        tag: u64,
        cpu: usize,
        occupant: u64,
    },
    #[error("cannot {verb} call stack {tag:#x}; cpu {cpu} has no call stack", verb = .op.verb())]
    NoCallStack { op: FcallState, tag: u64, cpu: usize },
    #[error("cannot resume call stack {tag:#x}; unknown tag")]
    UnknownTag { tag: u64 },
    #[error("cannot end call stack {tag:#x}; cpu {cpu} is running call stack {occupant:#x}")]
    TagMismatch { tag: u64, cpu: usize, occupant: u64 },
    #[error("cpu {cpu} out of range (tracking {num_cpus} cpus)")]
    CpuOutOfRange { cpu: usize, num_cpus: usize },
    #[error("unknown fcall state {0}")]
    UnknownState(u32),
}

pub type Result<T> = std::result::Result<T, CallStackError>;
