//! Virtual-time driver and invariant oracles for the scheduler core.
//!
//! The runner models workloads as step programs: the resumed, running
//! workload advances one step per tick, reporting progress and raising I/O
//! requests exactly where its spec says. Device service completes a fixed
//! number of ticks after it starts. After every tick the runner checks the
//! scheduler's safety and fairness invariants and reports the first
//! violation.

use serde::{Deserialize, Serialize};

use crate::kernel::{AppMessage, Kernel, KernelConfig, KernelFx};
use crate::proc::{IoDirection, Pid, ProcState};
use crate::sim::clock::SimClock;
use crate::trace::TraceEvent;

/// Workload model for simulation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimWorkloadSpec {
    pub name: String,
    /// Steps until the workload exits.
    pub max_steps: u32,
    /// Steps (1-based) at which the workload requests I/O and suspends.
    pub io_steps: Vec<u32>,
    /// A stuck workload stays runnable but never makes progress; it
    /// exercises the anti-stall watchdog.
    pub stuck: bool,
}

impl SimWorkloadSpec {
    pub fn cpu_bound(name: impl Into<String>, max_steps: u32) -> Self {
        Self {
            name: name.into(),
            max_steps,
            io_steps: Vec::new(),
            stuck: false,
        }
    }

    pub fn with_io(name: impl Into<String>, max_steps: u32, io_steps: Vec<u32>) -> Self {
        Self {
            name: name.into(),
            max_steps,
            io_steps,
            stuck: false,
        }
    }

    pub fn stuck(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_steps: u32::MAX,
            io_steps: Vec::new(),
            stuck: true,
        }
    }
}

/// Simulation parameters. Defaults match the reference timing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimConfig {
    /// Device service latency in ticks.
    pub io_latency: u64,
    /// Tick bound before the run is declared hung.
    pub max_ticks: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            io_latency: 3,
            max_ticks: 1000,
        }
    }
}

/// Result of a simulation run.
#[derive(Clone, Debug)]
pub enum RunOutcome {
    Ok(SimReport),
    Failed(FailureReport),
}

impl RunOutcome {
    /// Unwrap the report, panicking with the failure details otherwise.
    pub fn expect_ok(self) -> SimReport {
        match self {
            RunOutcome::Ok(report) => report,
            RunOutcome::Failed(fail) => panic!("simulation failed: {fail:?}"),
        }
    }
}

/// Summary of a finished (or cut-off) simulation.
#[derive(Clone, Debug)]
pub struct SimReport {
    pub ticks: u64,
    pub finished: usize,
    /// Pids in device-service start order.
    pub service_order: Vec<Pid>,
    pub trace: Vec<TraceEvent>,
}

/// First invariant violation observed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailureReport {
    pub kind: FailureKind,
    pub message: String,
    pub tick: u64,
}

/// Failure classification.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum FailureKind {
    /// The run did not terminate within the tick bound.
    Hang,
    /// A safety invariant was violated; `code` identifies the check.
    InvariantViolation { code: u32 },
    /// A running process survived a tick despite ready contenders.
    FairnessViolation,
}

#[derive(Clone, Debug)]
struct WorkloadState {
    step: u32,
    exited: bool,
    reaped: bool,
}

/// Effects recorder: the sim side of the [`KernelFx`] seam.
#[derive(Default)]
struct SimFx {
    runnable: Vec<bool>,
    started: Vec<Pid>,
}

impl KernelFx for SimFx {
    fn resume(&mut self, pid: Pid) {
        if let Some(flag) = self.runnable.get_mut(pid.index()) {
            *flag = true;
        }
    }

    fn suspend(&mut self, pid: Pid) {
        if let Some(flag) = self.runnable.get_mut(pid.index()) {
            *flag = false;
        }
    }

    fn start_service(&mut self, pid: Pid) {
        self.started.push(pid);
    }
}

/// Deterministic driver for one simulated scheduler run.
pub struct SimRunner {
    cfg: SimConfig,
    specs: Vec<SimWorkloadSpec>,
    kernel: Kernel,
    clock: SimClock,
    fx: SimFx,
    states: Vec<WorkloadState>,
    pending_completion: Option<u64>,
    service_order: Vec<Pid>,
}

impl SimRunner {
    pub fn new(specs: Vec<SimWorkloadSpec>, cfg: SimConfig) -> Self {
        let mut kernel = Kernel::new(KernelConfig::default());
        kernel.record_boot(specs.len());

        let mut fx = SimFx {
            runnable: vec![false; specs.len()],
            started: Vec::new(),
        };
        for spec in &specs {
            kernel.spawn(spec.name.clone());
        }
        let states = specs
            .iter()
            .map(|_| WorkloadState {
                step: 0,
                exited: false,
                reaped: false,
            })
            .collect();

        kernel.dispatch(&mut fx);

        let mut runner = Self {
            cfg,
            specs,
            kernel,
            clock: SimClock::new(),
            fx,
            states,
            pending_completion: None,
            service_order: Vec::new(),
        };
        runner.drain_service_starts();
        runner
    }

    /// Run until termination or the configured tick bound.
    pub fn run(mut self) -> RunOutcome {
        for _ in 0..self.cfg.max_ticks {
            match self.step_tick() {
                Ok(true) => return RunOutcome::Ok(self.report()),
                Ok(false) => {}
                Err(fail) => return RunOutcome::Failed(fail),
            }
        }
        let tick = self.clock.now_ticks();
        RunOutcome::Failed(FailureReport {
            kind: FailureKind::Hang,
            message: "tick bound exceeded before termination".to_string(),
            tick,
        })
    }

    /// Run a fixed number of ticks and return the state snapshot; used for
    /// scenarios that intentionally never terminate (e.g. a stuck workload).
    pub fn run_ticks(mut self, ticks: u64) -> Result<SimReport, FailureReport> {
        for _ in 0..ticks {
            if self.step_tick()? {
                break;
            }
        }
        Ok(self.report())
    }

    fn report(&self) -> SimReport {
        SimReport {
            ticks: self.clock.now_ticks(),
            finished: self.kernel.finished_count(),
            service_order: self.service_order.clone(),
            trace: self.kernel.trace().dump(),
        }
    }

    /// One simulated quantum. Returns `Ok(true)` once the scheduler reports
    /// all-done.
    fn step_tick(&mut self) -> Result<bool, FailureReport> {
        self.clock.advance_by(1);

        // Workload messages: the resumed running workload advances one step.
        self.advance_running_workload();
        self.drain_service_starts();

        // Completion interrupt, if the service period has elapsed.
        if let Some(due) = self.pending_completion {
            if due <= self.clock.now_ticks() {
                self.pending_completion = None;
                self.kernel.on_io_complete(&mut self.fx);
                self.drain_service_starts();
            }
        }

        // Timer interrupt, with the fairness oracle around it.
        let pre_current = self.kernel.current();
        let contention = self.kernel.ready_queue().next().is_some();
        self.kernel.on_tick(&mut self.fx);
        self.drain_service_starts();
        if contention && pre_current.is_some() && self.kernel.current() == pre_current {
            return Err(self.fail(
                FailureKind::FairnessViolation,
                "running process not preempted within one tick under contention",
            ));
        }

        // Reap exits.
        for idx in 0..self.states.len() {
            if self.states[idx].exited && !self.states[idx].reaped {
                self.states[idx].reaped = true;
                self.kernel.on_exited(Pid::from_u32(idx as u32), &mut self.fx);
                self.drain_service_starts();
            }
        }

        if self.kernel.all_done() {
            self.kernel.record_all_done();
            self.kernel.record_shutdown();
            return Ok(true);
        }

        if self.kernel.current().is_none() {
            self.kernel.dispatch(&mut self.fx);
            self.drain_service_starts();
        }

        self.check_invariants()?;
        Ok(false)
    }

    fn advance_running_workload(&mut self) {
        let Some(pid) = self.kernel.current() else {
            return;
        };
        let idx = pid.index();
        if !self.fx.runnable.get(idx).copied().unwrap_or(false) {
            return;
        }
        let spec = &self.specs[idx];
        if spec.stuck || self.states[idx].exited {
            return;
        }

        let step = self.states[idx].step + 1;
        self.states[idx].step = step;
        self.kernel
            .handle_message(AppMessage::Status { pid, step }, &mut self.fx);

        if spec.io_steps.contains(&step) {
            let dir = IoDirection::for_step(step);
            self.kernel
                .handle_message(AppMessage::IoRequest { pid, dir }, &mut self.fx);
        } else if step >= spec.max_steps {
            self.states[idx].exited = true;
        }
    }

    /// Move recorded service starts into the pending-completion slot.
    fn drain_service_starts(&mut self) {
        let started = std::mem::take(&mut self.fx.started);
        for pid in started {
            debug_assert!(
                self.pending_completion.is_none(),
                "device started a second service while one was outstanding"
            );
            self.pending_completion = Some(self.clock.now_ticks() + self.cfg.io_latency);
            self.service_order.push(pid);
        }
    }

    fn check_invariants(&self) -> Result<(), FailureReport> {
        let kernel = &self.kernel;

        // At most one RUNNING, and it must be the current pid.
        let running: Vec<Pid> = kernel
            .table()
            .iter()
            .filter(|p| p.state == ProcState::Running)
            .map(|p| p.pid)
            .collect();
        if running.len() > 1 {
            return Err(self.fail(
                FailureKind::InvariantViolation { code: 1 },
                "more than one process RUNNING",
            ));
        }
        if running.first().copied() != kernel.current() {
            return Err(self.fail(
                FailureKind::InvariantViolation { code: 2 },
                "RUNNING state out of sync with current",
            ));
        }

        // Device slot consistency.
        if kernel.serving().is_some() != kernel.device_busy() {
            return Err(self.fail(
                FailureKind::InvariantViolation { code: 3 },
                "device busy flag out of sync with serving id",
            ));
        }
        if let Some(pid) = kernel.serving() {
            if kernel.table().state(pid) != Some(ProcState::Blocked) {
                return Err(self.fail(
                    FailureKind::InvariantViolation { code: 4 },
                    "process in service is not BLOCKED",
                ));
            }
        }

        // Queue disjointness and hygiene.
        let ready: Vec<Pid> = kernel.ready_queue().collect();
        let waiting: Vec<Pid> = kernel.io_queue().collect();
        for pid in &ready {
            if waiting.contains(pid) {
                return Err(self.fail(
                    FailureKind::InvariantViolation { code: 5 },
                    "pid present in both ready and I/O queues",
                ));
            }
            if Some(*pid) == kernel.current() || Some(*pid) == kernel.serving() {
                return Err(self.fail(
                    FailureKind::InvariantViolation { code: 6 },
                    "running/serving pid still queued",
                ));
            }
        }
        for pid in ready.iter().chain(waiting.iter()) {
            if kernel.table().state(*pid) == Some(ProcState::Finished) {
                return Err(self.fail(
                    FailureKind::InvariantViolation { code: 7 },
                    "FINISHED pid present in a queue",
                ));
            }
        }

        // Finish accounting.
        let finished_states = kernel
            .table()
            .iter()
            .filter(|p| p.state == ProcState::Finished)
            .count();
        if finished_states != kernel.finished_count() {
            return Err(self.fail(
                FailureKind::InvariantViolation { code: 8 },
                "finished counter diverged from FINISHED states",
            ));
        }

        Ok(())
    }

    fn fail(&self, kind: FailureKind, message: &str) -> FailureReport {
        FailureReport {
            kind,
            message: message.to_string(),
            tick: self.clock.now_ticks(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_cpu_workload_runs_to_completion() {
        let specs = vec![SimWorkloadSpec::cpu_bound("A1", 5)];
        let report = SimRunner::new(specs, SimConfig::default()).run().expect_ok();

        assert_eq!(report.finished, 1);
        assert!(report.service_order.is_empty());
    }

    #[test]
    fn io_workload_is_serviced_and_finishes() {
        let specs = vec![SimWorkloadSpec::with_io("A1", 6, vec![2])];
        let report = SimRunner::new(specs, SimConfig::default()).run().expect_ok();

        assert_eq!(report.finished, 1);
        assert_eq!(report.service_order, vec![Pid::from_u32(0)]);
        assert!(report
            .trace
            .iter()
            .any(|ev| matches!(ev, TraceEvent::Block { step: 2, .. })));
    }

    #[test]
    fn stuck_workload_triggers_watchdog_nudges() {
        let specs = vec![SimWorkloadSpec::stuck("A1")];
        let report = SimRunner::new(specs, SimConfig::default())
            .run_ticks(12)
            .expect("no invariant failures");

        let nudges = report
            .trace
            .iter()
            .filter(|ev| matches!(ev, TraceEvent::Nudge { .. }))
            .count();
        // Threshold 5: two nudges fit in 12 ticks.
        assert_eq!(nudges, 2);
        assert_eq!(report.finished, 0);
    }

    #[test]
    fn stuck_run_reports_hang_at_the_bound() {
        let specs = vec![SimWorkloadSpec::stuck("A1")];
        let cfg = SimConfig {
            max_ticks: 20,
            ..SimConfig::default()
        };
        match SimRunner::new(specs, cfg).run() {
            RunOutcome::Failed(fail) => assert!(matches!(fail.kind, FailureKind::Hang)),
            RunOutcome::Ok(_) => panic!("stuck workload must not terminate"),
        }
    }
}
