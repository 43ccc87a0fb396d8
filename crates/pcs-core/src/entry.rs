//! Call stack transition records.

use std::fmt;
use std::str::FromStr;

use crate::CallStackError;

/// Call stack transition carried by an fcall record.
///
/// The raw encoding is the `u32` discriminant used in binary trace dumps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum FcallState {
    /// A new call stack begins running on the record's CPU.
    Start = 0,
    /// A paused call stack is bound to the record's CPU again.
    Resume = 1,
    /// The record's CPU moves on; its call stack stays alive.
    Pause = 2,
    /// The call stack running on the record's CPU terminates.
    Done = 3,
}

impl FcallState {
    pub const ALL: [Self; 4] = [Self::Start, Self::Resume, Self::Pause, Self::Done];

    /// Lowercase name, as written in text dumps.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Resume => "resume",
            Self::Pause => "pause",
            Self::Done => "done",
        }
    }

    /// Verb used in diagnostics ("cannot <verb> call stack ...").
    #[must_use]
    pub const fn verb(self) -> &'static str {
        match self {
            Self::Done => "end",
            other => other.as_str(),
        }
    }
}

impl TryFrom<u32> for FcallState {
    type Error = CallStackError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Self::Start),
            1 => Ok(Self::Resume),
            2 => Ok(Self::Pause),
            3 => Ok(Self::Done),
            _ => Err(CallStackError::UnknownState(raw)),
        }
    }
}

impl From<FcallState> for u32 {
    fn from(state: FcallState) -> Self {
        state as Self
    }
}

impl fmt::Display for FcallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FcallState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown fcall state '{s}'"))
    }
}

/// One call stack transition from the trace.
///
/// Only `cpu`, `tag` and `state` drive the tracker. The remaining fields
/// describe the point in the trace where the transition happened and are
/// handed to payload constructors untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FcallEntry {
    /// CPU the transition happened on.
    pub cpu: usize,
    /// Call stack tag.
    pub tag: u64,
    pub state: FcallState,
    /// Trace timestamp.
    pub ts: u64,
    /// Thread id, when known.
    pub tid: u64,
    /// Program counter at the transition.
    pub pc: u64,
    /// Call depth at the transition.
    pub depth: u16,
}

impl FcallEntry {
    #[must_use]
    pub const fn new(cpu: usize, tag: u64, state: FcallState) -> Self {
        Self {
            cpu,
            tag,
            state,
            ts: 0,
            tid: 0,
            pc: 0,
            depth: 0,
        }
    }

    #[must_use]
    pub const fn with_ts(mut self, ts: u64) -> Self {
        self.ts = ts;
        self
    }

    #[must_use]
    pub const fn with_tid(mut self, tid: u64) -> Self {
        self.tid = tid;
        self
    }

    #[must_use]
    pub const fn with_pc(mut self, pc: u64) -> Self {
        self.pc = pc;
        self
    }

    #[must_use]
    pub const fn with_depth(mut self, depth: u16) -> Self {
        self.depth = depth;
        self
    }
}
