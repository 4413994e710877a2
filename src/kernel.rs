//! Scheduler core: dispatch, preemption, I/O arbitration, and termination.
//!
//! The [`Kernel`] is a plain state machine. It owns the process table, the
//! ready and I/O wait queues, the single device slot, and the anti-stall
//! watchdog; it never blocks and never spawns threads. Side effects —
//! resuming or suspending a workload, starting a device service period — go
//! through the [`KernelFx`] seam so the threaded runtime and the
//! deterministic simulation drive the exact same logic.
//!
//! Invariants maintained here:
//! - At most one process is RUNNING; at most one is in active I/O service.
//! - A pid is in at most one of {ready queue, I/O queue, running, in service,
//!   finished} at a time.
//! - A FINISHED pid never re-enters any queue; stale queue entries are
//!   skipped on pop.
//! - The finished counter increments exactly once per pid.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::proc::{IoDirection, Pid, ProcState, ProcTable, MAX_PROCS};
use crate::trace::{TraceEvent, TraceRing};

/// Consecutive no-progress ticks before the watchdog nudges a lone runner.
pub const NUDGE_THRESHOLD: u32 = 5;

/// Messages delivered from workloads to the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppMessage {
    /// Progress report: the workload reached `step`.
    Status { pid: Pid, step: u32 },
    /// Blocking I/O request; the workload suspends until resumed.
    IoRequest { pid: Pid, dir: IoDirection },
}

/// Side-effect seam between the kernel and its collaborators.
///
/// Implementations must be cheap and non-blocking: the threaded runtime
/// flips a runnable flag and unparks, the simulation records the effect.
/// `resume` may be delivered redundantly (lost-wakeup recovery); workloads
/// must tolerate duplicates.
pub trait KernelFx {
    /// Signal a workload that it may continue from its last reported step.
    fn resume(&mut self, pid: Pid);
    /// Signal a workload to stop at its next step boundary.
    fn suspend(&mut self, pid: Pid);
    /// Begin a timed service period for `pid` on the I/O device.
    fn start_service(&mut self, pid: Pid);
}

/// Kernel tuning knobs. Defaults match the reference simulation.
#[derive(Clone, Copy, Debug)]
pub struct KernelConfig {
    /// Queue capacity bound; insertions beyond it are silently rejected.
    pub max_procs: usize,
    /// Watchdog threshold in consecutive no-progress ticks.
    pub nudge_threshold: u32,
    /// Trace ring capacity.
    pub trace_capacity: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_procs: MAX_PROCS,
            nudge_threshold: NUDGE_THRESHOLD,
            trace_capacity: 4096,
        }
    }
}

/// Scheduler state machine.
pub struct Kernel {
    cfg: KernelConfig,
    table: ProcTable,
    ready: VecDeque<Pid>,
    io_wait: VecDeque<Pid>,
    device_busy: bool,
    serving: Option<Pid>,
    current: Option<Pid>,
    finished: usize,
    /// Consecutive ticks the lone runner made no observable progress.
    stall_ticks: u32,
    /// Step value the watchdog last observed for the current process.
    progress_baseline: u32,
    /// Set once the empty-queue dispatch has been logged for this idle period.
    idle_logged: bool,
    trace: TraceRing,
}

impl Kernel {
    pub fn new(cfg: KernelConfig) -> Self {
        let trace = TraceRing::new(cfg.trace_capacity);
        Self {
            cfg,
            table: ProcTable::new(),
            ready: VecDeque::new(),
            io_wait: VecDeque::new(),
            device_busy: false,
            serving: None,
            current: None,
            finished: 0,
            stall_ticks: 0,
            progress_baseline: 0,
            idle_logged: false,
            trace,
        }
    }

    /// Register a workload, mark it READY, and enqueue it.
    pub fn spawn(&mut self, name: impl Into<String>) -> Pid {
        let pid = self.table.spawn(name);
        self.enqueue_ready(pid);
        self.record(TraceEvent::Spawn {
            pid,
            name: self.name_of(pid),
        });
        pid
    }

    pub fn record_boot(&mut self, apps: usize) {
        self.record(TraceEvent::Boot { apps: apps as u32 });
    }

    pub fn record_shutdown(&mut self) {
        self.record(TraceEvent::Shutdown);
    }

    /// Handle one workload message.
    pub fn handle_message(&mut self, msg: AppMessage, fx: &mut impl KernelFx) {
        match msg {
            AppMessage::Status { pid, step } => self.handle_status(pid, step),
            AppMessage::IoRequest { pid, dir } => self.handle_io_request(pid, dir, fx),
        }
    }

    fn handle_status(&mut self, pid: Pid, step: u32) {
        let Some(pcb) = self.table.get_mut(pid) else {
            debug!(pid = pid.as_u32(), "status from unknown pid dropped");
            return;
        };
        if pcb.state == ProcState::Finished {
            return;
        }
        pcb.last_step = step;
        if self.current == Some(pid) {
            // Progress by the running process resets the watchdog.
            self.progress_baseline = step;
            self.stall_ticks = 0;
        }
        self.record(TraceEvent::Progress {
            pid,
            name: self.name_of(pid),
            step,
        });
    }

    fn handle_io_request(&mut self, pid: Pid, dir: IoDirection, fx: &mut impl KernelFx) {
        let Some(pcb) = self.table.get_mut(pid) else {
            debug!(pid = pid.as_u32(), "I/O request from unknown pid dropped");
            return;
        };
        if pcb.state == ProcState::Finished {
            return;
        }
        pcb.last_io = Some(dir);
        let step = pcb.last_step;
        let was_running = pcb.state == ProcState::Running;
        pcb.state = ProcState::Blocked;

        self.record(TraceEvent::Syscall {
            pid,
            name: self.name_of(pid),
            dir,
        });

        if was_running {
            fx.suspend(pid);
            if self.current == Some(pid) {
                self.current = None;
            }
            self.record(TraceEvent::Block {
                pid,
                name: self.name_of(pid),
                step,
                dir,
            });
        }
        // A request racing a preemption still lands on the wait queue; the
        // pid leaves the ready queue so the two never overlap.
        self.ready.retain(|p| *p != pid);

        self.enqueue_io(pid);
        self.start_service_if_idle(fx);
    }

    /// Timer interrupt. Preempts under contention; otherwise runs the
    /// lone-runner watchdog.
    pub fn on_tick(&mut self, fx: &mut impl KernelFx) {
        if let Some(cur) = self.current {
            if self.ready.is_empty() {
                self.record(TraceEvent::TimerIrq { lone_runner: true });

                // Redundant resume: recovers a workload left suspended by a
                // suspend/resume race.
                fx.resume(cur);

                let last_step = self.table.get(cur).map(|p| p.last_step).unwrap_or(0);
                if last_step == self.progress_baseline {
                    self.stall_ticks += 1;
                } else {
                    self.progress_baseline = last_step;
                    self.stall_ticks = 0;
                }

                if self.stall_ticks >= self.cfg.nudge_threshold {
                    let stalled = self.stall_ticks;
                    warn!(
                        pid = cur.as_u32(),
                        stalled, "watchdog: lone runner stalled, forcing redispatch"
                    );
                    self.record(TraceEvent::Nudge {
                        pid: cur,
                        name: self.name_of(cur),
                        stalled_ticks: stalled,
                    });
                    fx.suspend(cur);
                    if let Some(pcb) = self.table.get_mut(cur) {
                        pcb.state = ProcState::Ready;
                    }
                    self.current = None;
                    self.enqueue_ready(cur);
                    self.stall_ticks = 0;
                    self.dispatch(fx);
                }
                return;
            }
        }

        self.record(TraceEvent::TimerIrq { lone_runner: false });
        self.preempt(fx);
        self.dispatch(fx);
    }

    /// Completion interrupt from the I/O device.
    pub fn on_io_complete(&mut self, fx: &mut impl KernelFx) {
        self.record(TraceEvent::IoIrq);

        self.device_busy = false;
        if let Some(pid) = self.serving.take() {
            if self.table.state(pid) == Some(ProcState::Blocked) {
                if let Some(pcb) = self.table.get_mut(pid) {
                    pcb.state = ProcState::Ready;
                }
                self.enqueue_ready(pid);
                self.record(TraceEvent::IoDone {
                    pid,
                    name: self.name_of(pid),
                });
            }
        }
        // Chain to the next waiter so the device never idles over a tick
        // while the wait queue is non-empty.
        self.start_service_if_idle(fx);
        self.dispatch(fx);
    }

    /// A workload exited. Marks it FINISHED exactly once and purges it from
    /// every queue and from the device slot.
    pub fn on_exited(&mut self, pid: Pid, fx: &mut impl KernelFx) {
        let Some(pcb) = self.table.get_mut(pid) else {
            return;
        };
        if pcb.state == ProcState::Finished {
            // Duplicate exit signal.
            return;
        }
        pcb.state = ProcState::Finished;
        self.finished += 1;

        if self.current == Some(pid) {
            self.current = None;
        }
        self.ready.retain(|p| *p != pid);
        self.io_wait.retain(|p| *p != pid);
        if self.serving == Some(pid) {
            self.serving = None;
            self.device_busy = false;
        }

        self.record(TraceEvent::Finished {
            pid,
            name: self.name_of(pid),
        });

        // The exiting process may have owned the device slot.
        self.start_service_if_idle(fx);
    }

    /// Move the head of the ready queue to RUNNING if the CPU is idle.
    pub fn dispatch(&mut self, fx: &mut impl KernelFx) {
        if self.current.is_some() {
            return;
        }

        while let Some(pid) = self.ready.pop_front() {
            // Stale entries: ids that finished after being enqueued.
            if self.table.is_unreachable(pid) {
                debug!(pid = pid.as_u32(), "skipping stale ready-queue entry");
                continue;
            }

            let (restore_step, io) = {
                let pcb = self.table.get_mut(pid).expect("reachable pid has a pcb");
                pcb.state = ProcState::Running;
                (pcb.last_step, pcb.last_io)
            };
            self.current = Some(pid);
            self.progress_baseline = restore_step;
            self.stall_ticks = 0;
            self.idle_logged = false;

            self.record(TraceEvent::Dispatch {
                pid,
                name: self.name_of(pid),
                restore_step,
                io,
            });
            fx.resume(pid);
            return;
        }

        if !self.idle_logged {
            self.idle_logged = true;
            self.record(TraceEvent::Idle);
        }
    }

    /// Suspend the running process and requeue it at the tail (round robin).
    fn preempt(&mut self, fx: &mut impl KernelFx) {
        let Some(pid) = self.current.take() else {
            return;
        };
        fx.suspend(pid);
        if self.table.state(pid) == Some(ProcState::Running) {
            if let Some(pcb) = self.table.get_mut(pid) {
                pcb.state = ProcState::Ready;
            }
            self.enqueue_ready(pid);
        }
        self.stall_ticks = 0;
        self.record(TraceEvent::Preempt {
            pid,
            name: self.name_of(pid),
        });
    }

    /// Begin service for the head I/O waiter if the device is idle.
    fn start_service_if_idle(&mut self, fx: &mut impl KernelFx) {
        if self.device_busy {
            return;
        }
        while let Some(pid) = self.io_wait.pop_front() {
            if self.table.is_unreachable(pid) {
                debug!(pid = pid.as_u32(), "skipping stale I/O-queue entry");
                continue;
            }
            self.device_busy = true;
            self.serving = Some(pid);
            self.record(TraceEvent::IoStart {
                pid,
                name: self.name_of(pid),
            });
            fx.start_service(pid);
            return;
        }
    }

    fn enqueue_ready(&mut self, pid: Pid) {
        if self.table.is_unreachable(pid) {
            return;
        }
        if self.ready.len() >= self.cfg.max_procs {
            debug!(pid = pid.as_u32(), "ready queue full, insert rejected");
            return;
        }
        if self.ready.contains(&pid) {
            return;
        }
        self.ready.push_back(pid);
        // A ready process ends the current idle period.
        self.idle_logged = false;
    }

    fn enqueue_io(&mut self, pid: Pid) {
        if self.io_wait.len() >= self.cfg.max_procs {
            debug!(pid = pid.as_u32(), "I/O queue full, insert rejected");
            return;
        }
        if self.io_wait.contains(&pid) || self.serving == Some(pid) {
            return;
        }
        self.io_wait.push_back(pid);
    }

    /// Global termination predicate: everything finished, both queues empty,
    /// CPU idle, device idle.
    pub fn all_done(&self) -> bool {
        self.finished == self.table.len()
            && self.ready.is_empty()
            && self.current.is_none()
            && !self.device_busy
            && self.io_wait.is_empty()
    }

    pub fn record_all_done(&mut self) {
        self.record(TraceEvent::AllDone);
    }

    fn record(&mut self, ev: TraceEvent) {
        info!(target: "schedsim::trace", "{ev}");
        self.trace.push(ev);
    }

    fn name_of(&self, pid: Pid) -> String {
        self.table
            .get(pid)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| "?".to_string())
    }

    // Observability accessors, used by the runtimes and the test oracles.

    pub fn table(&self) -> &ProcTable {
        &self.table
    }

    pub fn current(&self) -> Option<Pid> {
        self.current
    }

    pub fn serving(&self) -> Option<Pid> {
        self.serving
    }

    pub fn device_busy(&self) -> bool {
        self.device_busy
    }

    pub fn finished_count(&self) -> usize {
        self.finished
    }

    pub fn stall_ticks(&self) -> u32 {
        self.stall_ticks
    }

    pub fn ready_queue(&self) -> impl Iterator<Item = Pid> + '_ {
        self.ready.iter().copied()
    }

    pub fn io_queue(&self) -> impl Iterator<Item = Pid> + '_ {
        self.io_wait.iter().copied()
    }

    pub fn trace(&self) -> &TraceRing {
        &self.trace
    }
}
