//! Workload processes: step programs executed on dedicated threads.
//!
//! A workload advances one step per configured interval, reports each step to
//! the scheduler, and at its configured I/O steps emits a blocking request
//! and suspends itself. Suspension is a wait on a resume notification: the
//! scheduler flips the runnable flag and unparks. The park has a bounded
//! timeout so a lost unpark degrades into a short delay that the scheduler's
//! redundant resume (and ultimately the watchdog nudge) recovers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use crossbeam_utils::sync::{Parker, Unparker};
use tracing::debug;

use crate::kernel::AppMessage;
use crate::proc::{IoDirection, Pid};

/// Reference step bound: a workload terminates after this many steps.
pub const DEFAULT_MAX_STEPS: u32 = 15;

/// Upper bound while a suspended workload waits for a resume before
/// re-checking its runnable flag.
const PARK_TIMEOUT: Duration = Duration::from_millis(25);

/// Which workloads perform I/O, mirroring the reference test profiles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Profile {
    /// No workload performs I/O.
    Cpu,
    /// Every workload performs I/O at its per-index steps.
    Io,
    /// Default: A1..A3 CPU-bound, A4..A6 with I/O steps.
    Split,
}

impl Profile {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cpu" => Some(Profile::Cpu),
            "io" => Some(Profile::Io),
            "split" => Some(Profile::Split),
            _ => None,
        }
    }

    /// Steps (1-based) at which workload `idx` (1-based) requests I/O.
    pub fn io_steps(self, idx: usize) -> Vec<u32> {
        match self {
            Profile::Cpu => Vec::new(),
            Profile::Io => match idx {
                1 => vec![3, 7, 12],
                2 => vec![4, 9],
                3 => vec![5, 10],
                _ => vec![6, 11],
            },
            Profile::Split => match idx {
                1..=3 => Vec::new(),
                4 => vec![3, 7, 12],
                5 => vec![6, 11],
                _ => vec![5, 10],
            },
        }
    }
}

/// Static description of one workload.
#[derive(Clone, Debug)]
pub struct WorkloadSpec {
    pub name: String,
    pub max_steps: u32,
    pub io_steps: Vec<u32>,
    pub step_interval: Duration,
}

impl WorkloadSpec {
    /// Specs for `apps` workloads named A1..An under `profile`.
    pub fn for_profile(
        apps: usize,
        profile: Profile,
        max_steps: u32,
        step_interval: Duration,
    ) -> Vec<WorkloadSpec> {
        (1..=apps)
            .map(|idx| WorkloadSpec {
                name: format!("A{idx}"),
                max_steps,
                io_steps: profile.io_steps(idx),
                step_interval,
            })
            .collect()
    }
}

/// Scheduler-side handle to a running workload thread.
pub struct WorkloadHandle {
    pub pid: Pid,
    gate: Arc<AtomicBool>,
    unparker: Unparker,
    join: Option<JoinHandle<()>>,
}

impl WorkloadHandle {
    /// Allow the workload to continue and wake it if parked.
    pub fn resume(&self) {
        self.gate.store(true, Ordering::Release);
        self.unparker.unpark();
    }

    /// Ask the workload to stop at its next step boundary.
    pub fn suspend(&self) {
        self.gate.store(false, Ordering::Release);
    }

    /// Whether the workload thread has exited (the reap check).
    pub fn is_exited(&self) -> bool {
        self.join.as_ref().map(|j| j.is_finished()).unwrap_or(true)
    }

    /// Join the exited thread. Called once during shutdown.
    pub fn reap(&mut self) {
        if let Some(join) = self.join.take() {
            // Shutdown only runs once every workload finished; a panic in a
            // workload body is a bug worth surfacing.
            if join.join().is_err() {
                debug!(pid = self.pid.as_u32(), "workload thread panicked");
            }
        }
    }
}

/// Spawn one workload thread. The workload starts suspended and waits for
/// the scheduler's first dispatch.
pub fn spawn_workload(pid: Pid, spec: WorkloadSpec, tx: Sender<AppMessage>) -> WorkloadHandle {
    let gate = Arc::new(AtomicBool::new(false));
    let parker = Parker::new();
    let unparker = parker.unparker().clone();

    let thread_gate = Arc::clone(&gate);
    let name = spec.name.clone();
    let join = thread::Builder::new()
        .name(name)
        .spawn(move || workload_main(pid, spec, thread_gate, parker, tx))
        .expect("spawn workload thread");

    WorkloadHandle {
        pid,
        gate,
        unparker,
        join: Some(join),
    }
}

fn workload_main(
    pid: Pid,
    spec: WorkloadSpec,
    gate: Arc<AtomicBool>,
    parker: Parker,
    tx: Sender<AppMessage>,
) {
    // Born suspended; the first dispatch releases us.
    wait_runnable(&gate, &parker);

    for step in 1..=spec.max_steps {
        if tx.send(AppMessage::Status { pid, step }).is_err() {
            // Scheduler gone; nothing left to report to.
            return;
        }
        thread::sleep(spec.step_interval);

        if spec.io_steps.contains(&step) {
            let dir = IoDirection::for_step(step);
            if tx.send(AppMessage::IoRequest { pid, dir }).is_err() {
                return;
            }
            // Voluntary stop narrows the race window before the scheduler's
            // own suspend lands.
            gate.store(false, Ordering::Release);
        }

        wait_runnable(&gate, &parker);
    }
}

fn wait_runnable(gate: &AtomicBool, parker: &Parker) {
    while !gate.load(Ordering::Acquire) {
        parker.park_timeout(PARK_TIMEOUT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn split_profile_matches_reference_tables() {
        assert!(Profile::Split.io_steps(1).is_empty());
        assert!(Profile::Split.io_steps(3).is_empty());
        assert_eq!(Profile::Split.io_steps(4), vec![3, 7, 12]);
        assert_eq!(Profile::Split.io_steps(5), vec![6, 11]);
        assert_eq!(Profile::Split.io_steps(6), vec![5, 10]);
    }

    #[test]
    fn io_profile_covers_every_index() {
        for idx in 1..=6 {
            assert!(!Profile::Io.io_steps(idx).is_empty());
        }
        assert_eq!(Profile::Io.io_steps(2), vec![4, 9]);
    }

    #[test]
    fn profile_parse_rejects_unknown_names() {
        assert_eq!(Profile::parse("cpu"), Some(Profile::Cpu));
        assert_eq!(Profile::parse("banana"), None);
    }

    #[test]
    fn workload_stays_suspended_until_first_resume() {
        let (tx, rx) = unbounded();
        let spec = WorkloadSpec {
            name: "A1".to_string(),
            max_steps: 2,
            io_steps: Vec::new(),
            step_interval: Duration::from_millis(1),
        };
        let mut handle = spawn_workload(Pid::from_u32(0), spec, tx);

        // No messages before the first dispatch.
        assert!(rx.recv_timeout(Duration::from_millis(60)).is_err());

        handle.resume();
        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(
            first,
            AppMessage::Status {
                pid: Pid::from_u32(0),
                step: 1
            }
        );

        // Runs to completion once resumed.
        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(
            second,
            AppMessage::Status {
                pid: Pid::from_u32(0),
                step: 2
            }
        );
        while !handle.is_exited() {
            thread::sleep(Duration::from_millis(5));
        }
        handle.reap();
    }

    #[test]
    fn workload_requests_io_and_suspends_itself() {
        let (tx, rx) = unbounded();
        let spec = WorkloadSpec {
            name: "A1".to_string(),
            max_steps: 3,
            io_steps: vec![1],
            step_interval: Duration::from_millis(1),
        };
        let mut handle = spawn_workload(Pid::from_u32(0), spec, tx);
        handle.resume();

        let status = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(status, AppMessage::Status { step: 1, .. }));
        let req = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(
            req,
            AppMessage::IoRequest {
                pid: Pid::from_u32(0),
                dir: IoDirection::Read
            }
        );

        // Suspended after the request: no further progress until resumed.
        assert!(rx.recv_timeout(Duration::from_millis(60)).is_err());

        handle.resume();
        let next = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(next, AppMessage::Status { step: 2, .. }));

        while !handle.is_exited() {
            thread::sleep(Duration::from_millis(5));
        }
        handle.reap();
    }
}
