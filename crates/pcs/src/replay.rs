//! Replay driver: feeds parsed records through the call stack tracker.

use std::path::Path;

use tracing::{debug, info};

use crate::stats::{EndReason, StackStats, StackSummary};
use crate::{
    Access, CallStackError, DEFAULT_MAX_CPUS, Error, FcallEntry, FcallState, PerCallStack, Record,
    Result, TraceReader, Transition, metrics,
};

/// Replay settings.
#[derive(Clone, Copy, Debug)]
pub struct ReplayConfig {
    /// Number of CPUs in the traced system.
    pub num_cpus: usize,
    /// Terminate call stacks that are still alive when the trace ends.
    pub flush_at_eof: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            num_cpus: DEFAULT_MAX_CPUS,
            flush_at_eof: true,
        }
    }
}

/// Outcome of a complete replay.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Summaries in the order the call stacks left the tracker: terminated
    /// ones first, then flushed ones in CPU order, then paused ones by tag.
    pub stacks: Vec<StackSummary>,
    /// Records replayed.
    pub records: u64,
    pub starts: u64,
    pub resumes: u64,
    pub pauses: u64,
    pub dones: u64,
    pub accesses: u64,
    /// Accesses on a CPU with no call stack bound.
    pub unattributed_accesses: u64,
    /// Largest number of simultaneously live call stacks.
    pub max_live: usize,
    /// Call stacks still alive after replay (only without `flush_at_eof`).
    pub live: usize,
}

impl ReplayReport {
    /// Summaries of call stacks that ended with a given reason.
    #[must_use]
    pub fn ended(&self, reason: EndReason) -> impl Iterator<Item = &StackSummary> + '_ {
        self.stacks.iter().filter(move |s| s.ended == reason)
    }
}

/// Incremental replay state.
pub struct Replayer {
    stacks: PerCallStack<StackStats>,
    report: ReplayReport,
    last_ts: u64,
    flush_at_eof: bool,
}

impl Replayer {
    #[must_use]
    pub fn new(config: &ReplayConfig) -> Self {
        Self {
            stacks: PerCallStack::with_cpus(config.num_cpus),
            report: ReplayReport::default(),
            last_ts: 0,
            flush_at_eof: config.flush_at_eof,
        }
    }

    /// The underlying tracker.
    #[must_use]
    pub const fn stacks(&self) -> &PerCallStack<StackStats> {
        &self.stacks
    }

    /// Apply one record.
    ///
    /// # Errors
    ///
    /// Returns the tracker's error when the record violates the call stack
    /// protocol or names a CPU outside the traced system. The trace is
    /// corrupt and replay must stop.
    pub fn apply(&mut self, record: &Record) -> std::result::Result<(), CallStackError> {
        match record {
            Record::Fcall(entry) => self.apply_fcall(entry)?,
            Record::Access(access) => self.apply_access(access)?,
        }
        self.report.records += 1;
        Ok(())
    }

    fn apply_fcall(&mut self, entry: &FcallEntry) -> std::result::Result<(), CallStackError> {
        // Pausing unbinds the payload, so record the pause while it is still current.
        if entry.state == FcallState::Pause {
            if let Some(stats) = self.stacks.current_mut(entry.cpu) {
                stats.on_pause(entry);
            }
        }

        match self.stacks.handle(entry, ())? {
            Transition::Started => self.report.starts += 1,
            Transition::Paused => self.report.pauses += 1,
            Transition::Resumed => {
                self.report.resumes += 1;
                if let Some(stats) = self.stacks.current_mut(entry.cpu) {
                    stats.on_resume(entry);
                }
            }
            Transition::Done(stats) => {
                self.report.dones += 1;
                self.retire(stats.finish(Some(entry.ts), EndReason::Done));
            }
        }

        self.last_ts = self.last_ts.max(entry.ts);
        self.report.max_live = self.report.max_live.max(self.stacks.len());
        metrics::record_transition(entry.state, self.stacks.len());
        Ok(())
    }

    fn apply_access(&mut self, access: &Access) -> std::result::Result<(), CallStackError> {
        let num_cpus = self.stacks.num_cpus();
        if access.cpu >= num_cpus {
            return Err(CallStackError::CpuOutOfRange {
                cpu: access.cpu,
                num_cpus,
            });
        }

        self.report.accesses += 1;
        self.last_ts = self.last_ts.max(access.ts);
        let attributed = match self.stacks.current_mut(access.cpu) {
            Some(stats) => {
                stats.on_access(access);
                true
            }
            None => {
                self.report.unattributed_accesses += 1;
                false
            }
        };
        metrics::record_access(attributed);
        Ok(())
    }

    fn retire(&mut self, summary: StackSummary) {
        metrics::record_call_stack(&summary);
        self.report.stacks.push(summary);
    }

    /// End replay and produce the report.
    #[must_use]
    pub fn finish(mut self) -> ReplayReport {
        if self.flush_at_eof {
            let end_ts = self.last_ts;
            for stats in self.stacks.flush() {
                self.retire(stats.finish(Some(end_ts), EndReason::Flushed));
            }
            for (_, stats) in self.stacks.drain_paused() {
                self.retire(stats.finish(None, EndReason::Paused));
            }
        }
        self.report.live = self.stacks.len();
        debug!(live = self.report.live, "replay finished");
        self.report
    }
}

/// Replay every record produced by `reader`.
///
/// # Errors
///
/// Returns an error if reading or parsing a line fails, or if a record is
/// rejected by the tracker. Replay stops at the first error.
pub fn replay_reader(reader: TraceReader, config: &ReplayConfig) -> Result<ReplayReport> {
    let mut replayer = Replayer::new(config);
    for item in reader {
        let (line, record) = item?;
        replayer
            .apply(&record)
            .map_err(|source| Error::Replay { line, source })?;
    }

    let report = replayer.finish();
    info!(
        records = report.records,
        call_stacks = report.stacks.len(),
        max_live = report.max_live,
        "replayed trace"
    );
    Ok(report)
}

/// Replay a trace dump file.
///
/// # Errors
///
/// Returns an error if the file cannot be opened, plus everything
/// [`replay_reader`] reports.
pub fn replay_file(path: impl AsRef<Path>, config: &ReplayConfig) -> Result<ReplayReport> {
    let path = path.as_ref();
    debug!(path = %path.display(), num_cpus = config.num_cpus, "replaying");
    replay_reader(TraceReader::open(path)?, config)
}
