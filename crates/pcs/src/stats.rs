//! Per-call-stack statistics payload.

use std::fmt;

use crate::{Access, CallStackState, FcallEntry};

/// How a call stack left the tracker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    /// A `done` record terminated it.
    Done,
    /// Replay ended while it was running; it was flushed from its CPU.
    Flushed,
    /// Replay ended while it was paused.
    Paused,
}

impl EndReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Flushed => "flushed",
            Self::Paused => "paused",
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Analysis state kept for each live call stack during replay.
#[derive(Clone, Debug)]
pub struct StackStats {
    tag: u64,
    tid: u64,
    start_pc: u64,
    start_ts: u64,
    last_ts: u64,
    cpu: usize,
    cpus: Vec<usize>,
    pauses: u64,
    resumes: u64,
    migrations: u64,
    accesses: u64,
    writes: u64,
}

impl CallStackState for StackStats {
    type Args = ();

    fn new(entry: &FcallEntry, (): ()) -> Self {
        Self {
            tag: entry.tag,
            tid: entry.tid,
            start_pc: entry.pc,
            start_ts: entry.ts,
            last_ts: entry.ts,
            cpu: entry.cpu,
            cpus: vec![entry.cpu],
            pauses: 0,
            resumes: 0,
            migrations: 0,
            accesses: 0,
            writes: 0,
        }
    }
}

impl StackStats {
    #[must_use]
    pub const fn tag(&self) -> u64 {
        self.tag
    }

    /// Number of accesses attributed so far.
    #[must_use]
    pub const fn accesses(&self) -> u64 {
        self.accesses
    }

    pub fn on_pause(&mut self, entry: &FcallEntry) {
        self.pauses += 1;
        self.last_ts = self.last_ts.max(entry.ts);
    }

    /// Record that the call stack was bound to `entry.cpu` again.
    pub fn on_resume(&mut self, entry: &FcallEntry) {
        self.resumes += 1;
        if entry.cpu != self.cpu {
            self.migrations += 1;
            self.cpu = entry.cpu;
        }
        if !self.cpus.contains(&entry.cpu) {
            self.cpus.push(entry.cpu);
        }
        self.last_ts = self.last_ts.max(entry.ts);
    }

    pub fn on_access(&mut self, access: &Access) {
        self.accesses += 1;
        if access.write {
            self.writes += 1;
        }
        self.last_ts = self.last_ts.max(access.ts);
    }

    /// Close the statistics, noting the final timestamp if known.
    #[must_use]
    pub fn finish(mut self, end_ts: Option<u64>, ended: EndReason) -> StackSummary {
        if let Some(ts) = end_ts {
            self.last_ts = self.last_ts.max(ts);
        }
        self.cpus.sort_unstable();
        StackSummary {
            tag: self.tag,
            tid: self.tid,
            start_pc: self.start_pc,
            start_ts: self.start_ts,
            duration: self.last_ts - self.start_ts,
            cpus: self.cpus,
            pauses: self.pauses,
            migrations: self.migrations,
            accesses: self.accesses,
            writes: self.writes,
            ended,
        }
    }
}

/// Final statistics of one call stack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackSummary {
    pub tag: u64,
    pub tid: u64,
    pub start_pc: u64,
    pub start_ts: u64,
    /// Trace time between the start record and the last record seen.
    pub duration: u64,
    /// Every CPU the call stack ran on, sorted.
    pub cpus: Vec<usize>,
    pub pauses: u64,
    /// Resumes onto a different CPU than the one it last ran on.
    pub migrations: u64,
    pub accesses: u64,
    pub writes: u64,
    pub ended: EndReason,
}
