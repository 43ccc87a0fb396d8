//! The per-CPU call stack tracker.
//!
//! The tag registry is the canonical owner of every payload. CPU slots only
//! name the tag of the call stack running there, so a payload is destroyed
//! through exactly one path: removal from the registry.

#[cfg(test)]
mod tests;

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::{CallStackError, FcallEntry, FcallState, Result};

/// Default number of CPU slots.
pub const DEFAULT_MAX_CPUS: usize = 256;

/// Per-call-stack analysis state created by the tracker.
///
/// `new` receives the `Start` record that created the call stack plus the
/// caller-supplied construction arguments. Use a tuple for several
/// arguments and `()` for none.
pub trait CallStackState: Sized {
    type Args;

    fn new(entry: &FcallEntry, args: Self::Args) -> Self;
}

/// Outcome of a successful transition.
#[derive(Debug, PartialEq, Eq)]
pub enum Transition<T> {
    Started,
    Resumed,
    Paused,
    /// The call stack terminated; ownership of its payload moves to the caller.
    Done(T),
}

/// A registered call stack and the CPU it is bound to, if running.
#[derive(Debug)]
struct Registered<T> {
    state: T,
    cpu: Option<usize>,
}

/// Tracks the call stack running on each CPU and owns one `T` per live call stack.
///
/// Every fallible operation checks all of its preconditions before touching
/// any state, so an `Err` leaves the tracker unchanged. Errors are protocol
/// violations: the caller must stop feeding transitions.
#[derive(Debug)]
pub struct PerCallStack<T> {
    /// cpu -> tag of the running call stack.
    current: Vec<Option<u64>>,
    /// tag -> payload, for every started and not yet terminated call stack.
    call_stacks: FxHashMap<u64, Registered<T>>,
}

impl<T> Default for PerCallStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PerCallStack<T> {
    /// Create a tracker with `DEFAULT_MAX_CPUS` slots.
    #[must_use]
    pub fn new() -> Self {
        Self::with_cpus(DEFAULT_MAX_CPUS)
    }

    /// Create a tracker for a system with `num_cpus` CPUs.
    #[must_use]
    pub fn with_cpus(num_cpus: usize) -> Self {
        Self {
            current: vec![None; num_cpus],
            call_stacks: FxHashMap::default(),
        }
    }

    /// Number of CPU slots.
    #[must_use]
    pub const fn num_cpus(&self) -> usize {
        self.current.len()
    }

    /// Number of live (running or paused) call stacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.call_stacks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.call_stacks.is_empty()
    }

    /// Whether `tag` names a live call stack.
    #[must_use]
    pub fn contains(&self, tag: u64) -> bool {
        self.call_stacks.contains_key(&tag)
    }

    /// CPU the call stack `tag` is running on, or `None` if paused or unknown.
    #[must_use]
    pub fn cpu_of(&self, tag: u64) -> Option<usize> {
        self.call_stacks.get(&tag).and_then(|cs| cs.cpu)
    }

    /// Iterate `(cpu, tag)` over occupied CPU slots in CPU order.
    pub fn running(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.current
            .iter()
            .enumerate()
            .filter_map(|(cpu, tag)| tag.map(|tag| (cpu, tag)))
    }

    /// Payload of the call stack running on `cpu`.
    #[must_use]
    pub fn current(&self, cpu: usize) -> Option<&T> {
        let tag = self.current.get(cpu).copied().flatten()?;
        self.call_stacks.get(&tag).map(|cs| &cs.state)
    }

    /// Mutable payload of the call stack running on `cpu`.
    pub fn current_mut(&mut self, cpu: usize) -> Option<&mut T> {
        let tag = self.current.get(cpu).copied().flatten()?;
        self.call_stacks.get_mut(&tag).map(|cs| &mut cs.state)
    }

    /// Start a call stack, building its payload with `make`.
    ///
    /// # Errors
    ///
    /// Returns an error if `entry.cpu` is out of range, the tag is already
    /// live, or the CPU already runs a call stack. `make` is not called then.
    pub fn start_with<F>(&mut self, entry: &FcallEntry, make: F) -> Result<()>
    where
        F: FnOnce(&FcallEntry) -> T,
    {
        let (cpu, tag) = (entry.cpu, entry.tag);
        self.check_cpu(cpu)?;
        if self.call_stacks.contains_key(&tag) {
            return Err(CallStackError::AlreadyExists { tag });
        }
        if let Some(occupant) = self.current[cpu] {
            return Err(CallStackError::CpuBusy {
                op: FcallState::Start,
                tag,
                cpu,
                occupant,
            });
        }

        let state = make(entry);
        self.call_stacks.insert(
            tag,
            Registered {
                state,
                cpu: Some(cpu),
            },
        );
        self.current[cpu] = Some(tag);
        trace!(cpu, "start call stack {tag:#x}");
        Ok(())
    }

    /// Detach the call stack running on `cpu` without destroying it.
    ///
    /// `tag` is only used for diagnostics; the slot decides which call
    /// stack is paused.
    ///
    /// # Errors
    ///
    /// Returns an error if `cpu` is out of range or runs no call stack.
    pub fn pause(&mut self, cpu: usize, tag: u64) -> Result<()> {
        self.check_cpu(cpu)?;
        let Some(occupant) = self.current[cpu] else {
            return Err(CallStackError::NoCallStack {
                op: FcallState::Pause,
                tag,
                cpu,
            });
        };

        if occupant != tag {
            debug!(cpu, "pause names call stack {tag:#x}, pausing running {occupant:#x}");
        }
        if let Some(cs) = self.call_stacks.get_mut(&occupant) {
            cs.cpu = None;
        }
        self.current[cpu] = None;
        trace!(cpu, "pause call stack {occupant:#x}");
        Ok(())
    }

    /// Bind the paused call stack `tag` to `cpu`.
    ///
    /// # Errors
    ///
    /// Returns an error if `cpu` is out of range or busy, or if `tag` is
    /// unknown or already running.
    pub fn resume(&mut self, cpu: usize, tag: u64) -> Result<()> {
        self.check_cpu(cpu)?;
        let Some(cs) = self.call_stacks.get_mut(&tag) else {
            return Err(CallStackError::UnknownTag { tag });
        };
        if let Some(occupant) = self.current[cpu] {
            return Err(CallStackError::CpuBusy {
                op: FcallState::Resume,
                tag,
                cpu,
                occupant,
            });
        }
        // A running call stack would end up bound to two CPUs.
        if let Some(running_on) = cs.cpu {
            return Err(CallStackError::CpuBusy {
                op: FcallState::Resume,
                tag,
                cpu: running_on,
                occupant: tag,
            });
        }

        cs.cpu = Some(cpu);
        self.current[cpu] = Some(tag);
        trace!(cpu, "resume call stack {tag:#x}");
        Ok(())
    }

    /// Terminate the call stack running on `cpu`, which must be `tag`.
    ///
    /// The payload is removed from the tracker and returned; dropping it
    /// destroys it.
    ///
    /// # Errors
    ///
    /// Returns an error if `cpu` is out of range, runs no call stack, or
    /// runs a call stack other than `tag`.
    pub fn done(&mut self, cpu: usize, tag: u64) -> Result<T> {
        self.check_cpu(cpu)?;
        let Some(occupant) = self.current[cpu] else {
            return Err(CallStackError::NoCallStack {
                op: FcallState::Done,
                tag,
                cpu,
            });
        };
        if occupant != tag {
            return Err(CallStackError::TagMismatch { tag, cpu, occupant });
        }
        let Some(cs) = self.call_stacks.remove(&tag) else {
            return Err(CallStackError::UnknownTag { tag });
        };

        self.current[cpu] = None;
        trace!(cpu, "end call stack {tag:#x}");
        Ok(cs.state)
    }

    /// Terminate every call stack still bound to a CPU.
    ///
    /// All slots end up empty. The terminated payloads are returned in CPU
    /// order. Paused call stacks are not bound to a CPU and stay registered;
    /// see [`Self::drain_paused`].
    pub fn flush(&mut self) -> Vec<T> {
        let mut flushed = Vec::new();
        for slot in &mut self.current {
            if let Some(cs) = slot.take().and_then(|tag| self.call_stacks.remove(&tag)) {
                flushed.push(cs.state);
            }
        }
        debug!(
            flushed = flushed.len(),
            paused = self.call_stacks.len(),
            "flushed running call stacks"
        );
        flushed
    }

    /// Remove every paused call stack, returning `(tag, payload)` pairs ordered by tag.
    pub fn drain_paused(&mut self) -> Vec<(u64, T)> {
        let mut tags: Vec<u64> = self
            .call_stacks
            .iter()
            .filter(|(_, cs)| cs.cpu.is_none())
            .map(|(&tag, _)| tag)
            .collect();
        tags.sort_unstable();

        tags.into_iter()
            .filter_map(|tag| self.call_stacks.remove(&tag).map(|cs| (tag, cs.state)))
            .collect()
    }

    fn check_cpu(&self, cpu: usize) -> Result<()> {
        if cpu < self.current.len() {
            Ok(())
        } else {
            Err(CallStackError::CpuOutOfRange {
                cpu,
                num_cpus: self.current.len(),
            })
        }
    }
}

impl<T: CallStackState> PerCallStack<T> {
    /// Start a call stack described by a `Start` record.
    ///
    /// # Errors
    ///
    /// See [`Self::start_with`].
    pub fn start(&mut self, entry: &FcallEntry, args: T::Args) -> Result<()> {
        self.start_with(entry, |entry| T::new(entry, args))
    }

    /// Apply one transition record.
    ///
    /// `args` is forwarded to `T::new` for `Start` records and ignored otherwise.
    ///
    /// # Errors
    ///
    /// Returns the error of the operation the record's state selects.
    pub fn handle(&mut self, entry: &FcallEntry, args: T::Args) -> Result<Transition<T>> {
        match entry.state {
            FcallState::Start => self.start(entry, args).map(|()| Transition::Started),
            FcallState::Pause => self
                .pause(entry.cpu, entry.tag)
                .map(|()| Transition::Paused),
            FcallState::Resume => self
                .resume(entry.cpu, entry.tag)
                .map(|()| Transition::Resumed),
            FcallState::Done => self.done(entry.cpu, entry.tag).map(Transition::Done),
        }
    }
}
