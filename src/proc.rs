//! Process table: identities, states, and per-process restore context.
//!
//! The table is the single source of truth for process state. Queues hold
//! only [`Pid`]s; every state decision consults the table, which is why stale
//! queue entries are harmless (they are filtered against the table on pop).
//!
//! State machine:
//! - READY -> RUNNING (dispatch)
//! - RUNNING -> READY (preemption or nudge)
//! - RUNNING -> BLOCKED (I/O request)
//! - BLOCKED -> READY (I/O completion)
//! - any non-terminal -> FINISHED (workload exit); FINISHED is absorbing.

use serde::{Deserialize, Serialize};

/// Upper bound on simultaneously managed processes.
///
/// Queue insertions beyond this bound are silently rejected; the bound is a
/// configuration contract, not a runtime fault.
pub const MAX_PROCS: usize = 6;

/// Stable process identifier.
///
/// Pids are dense indices assigned in spawn order, so they double as table
/// indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pid(u32);

impl Pid {
    #[inline(always)]
    pub fn from_u32(id: u32) -> Self {
        Self(id)
    }

    #[inline(always)]
    pub fn as_u32(self) -> u32 {
        self.0
    }

    #[inline(always)]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Scheduling state of a process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcState {
    Ready,
    Running,
    Blocked,
    Finished,
}

/// Direction of a blocking I/O request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoDirection {
    Read,
    Write,
}

impl IoDirection {
    /// Direction chosen by workloads: writes on even steps, reads on odd.
    #[inline(always)]
    pub fn for_step(step: u32) -> Self {
        if step % 2 == 0 {
            IoDirection::Write
        } else {
            IoDirection::Read
        }
    }

    /// One-letter display form used in restore-context log lines.
    #[inline(always)]
    pub fn letter(self) -> char {
        match self {
            IoDirection::Read => 'R',
            IoDirection::Write => 'W',
        }
    }
}

/// Process control block.
///
/// `last_step` is the restore context: the most recent progress value the
/// workload reported, re-displayed when the process is dispatched again.
/// `last_io` is retained for the same diagnostic display only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pcb {
    pub pid: Pid,
    pub name: String,
    pub state: ProcState,
    pub last_step: u32,
    pub last_io: Option<IoDirection>,
}

/// Fixed-capacity process table indexed by [`Pid`].
#[derive(Clone, Debug, Default)]
pub struct ProcTable {
    procs: Vec<Pcb>,
}

impl ProcTable {
    pub fn new() -> Self {
        Self {
            procs: Vec::with_capacity(MAX_PROCS),
        }
    }

    /// Register a new process in READY state and return its pid.
    pub fn spawn(&mut self, name: impl Into<String>) -> Pid {
        let pid = Pid(self.procs.len() as u32);
        self.procs.push(Pcb {
            pid,
            name: name.into(),
            state: ProcState::Ready,
            last_step: 0,
            last_io: None,
        });
        pid
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.procs.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    pub fn get(&self, pid: Pid) -> Option<&Pcb> {
        self.procs.get(pid.index())
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Pcb> {
        self.procs.get_mut(pid.index())
    }

    /// State lookup; `None` for ids the table has never seen.
    pub fn state(&self, pid: Pid) -> Option<ProcState> {
        self.get(pid).map(|p| p.state)
    }

    /// Whether an id is unreachable for scheduling purposes.
    ///
    /// Unknown ids count as finished so stale queue entries referring to them
    /// are skipped rather than dispatched.
    pub fn is_unreachable(&self, pid: Pid) -> bool {
        match self.state(pid) {
            Some(ProcState::Finished) | None => true,
            Some(_) => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pcb> {
        self.procs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_assigns_dense_pids_in_ready_state() {
        let mut table = ProcTable::new();
        let a = table.spawn("A1");
        let b = table.spawn("A2");

        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(table.state(a), Some(ProcState::Ready));
        assert_eq!(table.get(b).unwrap().last_step, 0);
        assert_eq!(table.get(b).unwrap().last_io, None);
    }

    #[test]
    fn unknown_and_finished_pids_are_unreachable() {
        let mut table = ProcTable::new();
        let a = table.spawn("A1");

        assert!(table.is_unreachable(Pid::from_u32(7)));
        assert!(!table.is_unreachable(a));

        table.get_mut(a).unwrap().state = ProcState::Finished;
        assert!(table.is_unreachable(a));
    }

    #[test]
    fn io_direction_parity_matches_workload_rule() {
        assert_eq!(IoDirection::for_step(3), IoDirection::Read);
        assert_eq!(IoDirection::for_step(12), IoDirection::Write);
        assert_eq!(IoDirection::Read.letter(), 'R');
    }
}
