use std::cell::Cell;
use std::rc::Rc;

use super::*;

/// Payload that counts how often it is dropped.
#[derive(Debug)]
struct Probe {
    tag: u64,
    start_cpu: usize,
    drops: Rc<Cell<usize>>,
}

impl CallStackState for Probe {
    type Args = Rc<Cell<usize>>;

    fn new(entry: &FcallEntry, drops: Self::Args) -> Self {
        Self {
            tag: entry.tag,
            start_cpu: entry.cpu,
            drops,
        }
    }
}

impl Drop for Probe {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

fn start(cpu: usize, tag: u64) -> FcallEntry {
    FcallEntry::new(cpu, tag, FcallState::Start)
}

/// Check I1-I4 against the internal tables.
fn assert_invariants<T>(stacks: &PerCallStack<T>) {
    let mut seen = Vec::new();
    for (cpu, tag) in stacks.running() {
        let cs = stacks
            .call_stacks
            .get(&tag)
            .unwrap_or_else(|| panic!("cpu {cpu} runs unregistered tag {tag:#x}"));
        assert_eq!(cs.cpu, Some(cpu), "registry disagrees with slot for {tag:#x}");
        assert!(!seen.contains(&tag), "tag {tag:#x} bound to two cpus");
        seen.push(tag);
    }
    for (&tag, cs) in &stacks.call_stacks {
        if let Some(cpu) = cs.cpu {
            assert_eq!(stacks.current[cpu], Some(tag));
        }
    }
}

#[test]
fn test_start_binds_current() {
    let drops = Rc::new(Cell::new(0));
    let mut stacks = PerCallStack::<Probe>::with_cpus(4);

    stacks.start(&start(0, 0x10), Rc::clone(&drops)).unwrap();

    let current = stacks.current(0).expect("cpu 0 should run 0x10");
    assert_eq!(current.tag, 0x10);
    assert_eq!(current.start_cpu, 0);
    assert!(stacks.current(1).is_none());
    assert_eq!(stacks.len(), 1);
    assert_eq!(stacks.cpu_of(0x10), Some(0));
    assert_invariants(&stacks);
}

#[test]
fn test_pause_then_resume_elsewhere() {
    let drops = Rc::new(Cell::new(0));
    let mut stacks = PerCallStack::<Probe>::with_cpus(4);

    stacks.start(&start(0, 0x10), Rc::clone(&drops)).unwrap();
    let before: *const Probe = stacks.current(0).unwrap();

    stacks.pause(0, 0x10).unwrap();
    assert!(stacks.current(0).is_none());
    assert!(stacks.contains(0x10));
    assert_eq!(stacks.cpu_of(0x10), None);
    assert_eq!(drops.get(), 0);
    assert_invariants(&stacks);

    stacks.resume(1, 0x10).unwrap();
    let after: *const Probe = stacks.current(1).unwrap();
    assert!(std::ptr::eq(before, after), "resume must rebind the same payload");
    assert_eq!(stacks.current(1).unwrap().start_cpu, 0);
    assert_eq!(stacks.cpu_of(0x10), Some(1));
    assert_invariants(&stacks);
}

#[test]
fn test_duplicate_start_rejected() {
    let drops = Rc::new(Cell::new(0));
    let mut stacks = PerCallStack::<Probe>::with_cpus(4);

    stacks.start(&start(0, 0x10), Rc::clone(&drops)).unwrap();
    let err = stacks.start(&start(0, 0x10), Rc::clone(&drops)).unwrap_err();
    assert_eq!(err, CallStackError::AlreadyExists { tag: 0x10 });

    // The rejected payload was never built; the first one is untouched.
    assert_eq!(drops.get(), 0);
    assert_eq!(stacks.len(), 1);
    assert_invariants(&stacks);
}

#[test]
fn test_start_on_busy_cpu_rejected() {
    let drops = Rc::new(Cell::new(0));
    let mut stacks = PerCallStack::<Probe>::with_cpus(4);

    stacks.start(&start(2, 0x10), Rc::clone(&drops)).unwrap();
    let err = stacks.start(&start(2, 0x20), Rc::clone(&drops)).unwrap_err();
    assert_eq!(
        err,
        CallStackError::CpuBusy {
            op: FcallState::Start,
            tag: 0x20,
            cpu: 2,
            occupant: 0x10,
        }
    );
    assert!(!stacks.contains(0x20));
    assert_eq!(stacks.current(2).unwrap().tag, 0x10);
}

#[test]
fn test_pause_empty_cpu_rejected() {
    let mut stacks = PerCallStack::<Probe>::with_cpus(4);
    let err = stacks.pause(2, 0x10).unwrap_err();
    assert!(matches!(
        err,
        CallStackError::NoCallStack {
            op: FcallState::Pause,
            cpu: 2,
            ..
        }
    ));
    assert_eq!(
        err.to_string(),
        "cannot pause call stack 0x10; cpu 2 has no call stack"
    );
}

#[test]
fn test_pause_pauses_occupant_regardless_of_tag() {
    let drops = Rc::new(Cell::new(0));
    let mut stacks = PerCallStack::<Probe>::with_cpus(4);
    stacks.start(&start(1, 0x10), Rc::clone(&drops)).unwrap();

    stacks.pause(1, 0x77).unwrap();

    assert!(stacks.current(1).is_none());
    assert!(stacks.contains(0x10));
    assert_eq!(stacks.cpu_of(0x10), None);
    assert!(!stacks.contains(0x77));
    assert_eq!(drops.get(), 0);
    assert_invariants(&stacks);

    stacks.resume(3, 0x10).unwrap();
    assert_eq!(stacks.current(3).unwrap().tag, 0x10);
}

#[test]
fn test_resume_errors() {
    let drops = Rc::new(Cell::new(0));
    let mut stacks = PerCallStack::<Probe>::with_cpus(4);

    assert_eq!(
        stacks.resume(0, 0x99),
        Err(CallStackError::UnknownTag { tag: 0x99 })
    );

    stacks.start(&start(0, 0x10), Rc::clone(&drops)).unwrap();
    stacks.start(&start(1, 0x20), Rc::clone(&drops)).unwrap();
    stacks.pause(0, 0x10).unwrap();

    // Target cpu is busy.
    assert!(matches!(
        stacks.resume(1, 0x10),
        Err(CallStackError::CpuBusy {
            op: FcallState::Resume,
            occupant: 0x20,
            ..
        })
    ));

    // 0x20 is still running on cpu 1.
    assert!(matches!(
        stacks.resume(0, 0x20),
        Err(CallStackError::CpuBusy { cpu: 1, .. })
    ));
    assert!(stacks.current(0).is_none());
    assert_invariants(&stacks);
}

#[test]
fn test_done_destroys_once() {
    let drops = Rc::new(Cell::new(0));
    let mut stacks = PerCallStack::<Probe>::with_cpus(4);

    stacks.start(&start(3, 0x10), Rc::clone(&drops)).unwrap();
    let payload = stacks.done(3, 0x10).unwrap();
    assert_eq!(payload.tag, 0x10);
    assert_eq!(drops.get(), 0);
    drop(payload);
    assert_eq!(drops.get(), 1);

    assert!(stacks.is_empty());
    assert!(stacks.current(3).is_none());
    assert!(matches!(
        stacks.done(3, 0x10),
        Err(CallStackError::NoCallStack {
            op: FcallState::Done,
            ..
        })
    ));
}

#[test]
fn test_done_tag_mismatch_rejected() {
    let drops = Rc::new(Cell::new(0));
    let mut stacks = PerCallStack::<Probe>::with_cpus(4);

    stacks.start(&start(0, 0x10), Rc::clone(&drops)).unwrap();
    stacks.pause(0, 0x10).unwrap();
    stacks.start(&start(0, 0x20), Rc::clone(&drops)).unwrap();

    let err = stacks.done(0, 0x10).unwrap_err();
    assert_eq!(
        err,
        CallStackError::TagMismatch {
            tag: 0x10,
            cpu: 0,
            occupant: 0x20,
        }
    );
    assert_eq!(drops.get(), 0);
    assert_eq!(stacks.len(), 2);
    assert_invariants(&stacks);
}

#[test]
fn test_cpu_out_of_range() {
    let drops = Rc::new(Cell::new(0));
    let mut stacks = PerCallStack::<Probe>::with_cpus(2);

    assert_eq!(
        stacks.start(&start(2, 0x10), drops),
        Err(CallStackError::CpuOutOfRange { cpu: 2, num_cpus: 2 })
    );
    assert!(stacks.current(2).is_none());
    assert!(stacks.current_mut(7).is_none());
}

#[test]
fn test_flush_destroys_running() {
    let drops = Rc::new(Cell::new(0));
    let mut stacks = PerCallStack::<Probe>::with_cpus(4);

    stacks.start(&start(0, 0x10), Rc::clone(&drops)).unwrap();
    stacks.start(&start(1, 0x20), Rc::clone(&drops)).unwrap();

    let flushed = stacks.flush();
    assert_eq!(
        flushed.iter().map(|p| p.tag).collect::<Vec<_>>(),
        vec![0x10, 0x20]
    );
    drop(flushed);
    assert_eq!(drops.get(), 2);

    assert!(stacks.current(0).is_none());
    assert!(stacks.current(1).is_none());
    assert!(stacks.flush().is_empty());
    drop(stacks);
    assert_eq!(drops.get(), 2);
}

#[test]
fn test_flush_keeps_paused() {
    let drops = Rc::new(Cell::new(0));
    let mut stacks = PerCallStack::<Probe>::with_cpus(4);

    stacks.start(&start(0, 0x30), Rc::clone(&drops)).unwrap();
    stacks.pause(0, 0x30).unwrap();
    stacks.start(&start(0, 0x10), Rc::clone(&drops)).unwrap();
    stacks.start(&start(1, 0x20), Rc::clone(&drops)).unwrap();
    stacks.pause(1, 0x20).unwrap();

    drop(stacks.flush());
    assert_eq!(drops.get(), 1);
    assert_eq!(stacks.len(), 2);

    let paused = stacks.drain_paused();
    assert_eq!(
        paused.iter().map(|(tag, _)| *tag).collect::<Vec<_>>(),
        vec![0x20, 0x30]
    );
    drop(paused);
    assert_eq!(drops.get(), 3);
    assert!(stacks.is_empty());
}

#[test]
fn test_drop_destroys_remaining() {
    let drops = Rc::new(Cell::new(0));
    let mut stacks = PerCallStack::<Probe>::with_cpus(4);

    stacks.start(&start(0, 0x10), Rc::clone(&drops)).unwrap();
    stacks.start(&start(1, 0x20), Rc::clone(&drops)).unwrap();
    stacks.pause(1, 0x20).unwrap();
    drop(stacks);
    assert_eq!(drops.get(), 2);
}

#[test]
fn test_round_trip_restores_empty() {
    let drops = Rc::new(Cell::new(0));
    let mut stacks = PerCallStack::<Probe>::with_cpus(4);

    let tag = 0xdead_beef;
    let steps = [
        (FcallState::Start, 0),
        (FcallState::Pause, 0),
        (FcallState::Resume, 3),
        (FcallState::Done, 3),
    ];
    for (state, cpu) in steps {
        stacks
            .handle(&FcallEntry::new(cpu, tag, state), Rc::clone(&drops))
            .unwrap();
        assert_invariants(&stacks);
    }

    assert!(!stacks.contains(tag));
    assert!(stacks.is_empty());
    assert_eq!(stacks.running().count(), 0);
    assert_eq!(drops.get(), 1);
}

#[test]
fn test_start_with_closure() {
    let mut stacks = PerCallStack::<u64>::with_cpus(2);
    stacks
        .start_with(&start(0, 7), |entry| entry.tag * 2)
        .unwrap();
    *stacks.current_mut(0).unwrap() += 1;
    assert_eq!(stacks.current(0), Some(&15));
    assert_eq!(stacks.done(0, 7), Ok(15));
}

#[test]
fn test_handle_reports_transition() {
    let drops = Rc::new(Cell::new(0));
    let mut stacks = PerCallStack::<Probe>::with_cpus(2);
    let entry = |state| FcallEntry::new(1, 0x42, state);

    assert!(matches!(
        stacks.handle(&entry(FcallState::Start), Rc::clone(&drops)),
        Ok(Transition::Started)
    ));
    assert!(matches!(
        stacks.handle(&entry(FcallState::Pause), Rc::clone(&drops)),
        Ok(Transition::Paused)
    ));
    assert!(matches!(
        stacks.handle(&entry(FcallState::Resume), Rc::clone(&drops)),
        Ok(Transition::Resumed)
    ));
    match stacks.handle(&entry(FcallState::Done), Rc::clone(&drops)) {
        Ok(Transition::Done(payload)) => assert_eq!(payload.tag, 0x42),
        other => panic!("expected Done, got {other:?}"),
    }
    assert_eq!(drops.get(), 1);
}

/// Drive a long well-formed interleaving and check the invariants after every step.
#[test]
fn test_invariants_hold_for_interleaved_replay() {
    const CPUS: usize = 4;
    let drops = Rc::new(Cell::new(0));
    let mut stacks = PerCallStack::<Probe>::with_cpus(CPUS);
    let mut paused: Vec<u64> = Vec::new();
    let mut next_tag = 1u64;
    let mut started = 0usize;
    let mut seed = 0x2545_f491_4f6c_dd1du64;

    for _ in 0..2000 {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        let cpu = usize::try_from(seed % CPUS as u64).unwrap();
        let choice = (seed >> 8) % 4;

        let entry = match stacks.current[cpu] {
            None if choice == 0 || paused.is_empty() => {
                next_tag += 1;
                started += 1;
                start(cpu, next_tag)
            }
            None => {
                let idx = usize::try_from(seed >> 16).unwrap() % paused.len();
                FcallEntry::new(cpu, paused.swap_remove(idx), FcallState::Resume)
            }
            Some(tag) if choice < 2 => {
                paused.push(tag);
                FcallEntry::new(cpu, tag, FcallState::Pause)
            }
            Some(tag) => FcallEntry::new(cpu, tag, FcallState::Done),
        };

        stacks.handle(&entry, Rc::clone(&drops)).unwrap();
        assert_invariants(&stacks);
        assert_eq!(stacks.len(), started - drops.get());
    }

    let running = stacks.running().count();
    drop(stacks.flush());
    assert_eq!(stacks.len(), paused.len());
    assert_eq!(drops.get() + paused.len(), started);
    assert!(running <= CPUS);
}
