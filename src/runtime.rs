//! Threaded runtime: channel wiring and the scheduler event loop.
//!
//! Three event sources feed the loop: workload messages, the periodic timer,
//! and I/O completion interrupts. The loop blocks on a bounded `select!` and
//! then processes one iteration in a fixed phase order — drain workload
//! messages, handle one pending I/O completion, handle the timer, reap
//! exited workloads, check termination, idle-dispatch. Draining messages
//! before interrupts avoids redispatching a process whose termination report
//! is still in flight.
//!
//! All scheduler state is owned by this loop; workload threads and the I/O
//! service communicate exclusively through channels and runnable flags.

use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use tracing::debug;

use crate::kernel::{AppMessage, Kernel, KernelConfig, KernelFx};
use crate::proc::Pid;
use crate::trace::TraceEvent;
use crate::workload::{spawn_workload, Profile, WorkloadHandle, WorkloadSpec, DEFAULT_MAX_STEPS};

/// I/O service latency, in timer quanta. The device completes exactly this
/// long after START_SERVICE.
pub const IO_LATENCY_QUANTA: u32 = 3;

/// Runtime configuration.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Number of workloads (reference bounds 3..=6, validated by the CLI).
    pub apps: usize,
    pub profile: Profile,
    /// Steps each workload executes before exiting.
    pub max_steps: u32,
    /// One quantum of simulated time.
    pub step_interval: Duration,
    /// Bounded wait in the event loop so reaping and the watchdog stay live.
    pub poll_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            apps: 3,
            profile: Profile::Split,
            max_steps: DEFAULT_MAX_STEPS,
            step_interval: Duration::from_millis(200),
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// Summary of a completed run.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub finished: usize,
    pub trace: Vec<TraceEvent>,
}

/// Kernel side effects wired to workload handles and the I/O service.
struct RuntimeFx<'a> {
    workloads: &'a [WorkloadHandle],
    service_tx: &'a Sender<()>,
}

impl KernelFx for RuntimeFx<'_> {
    fn resume(&mut self, pid: Pid) {
        if let Some(h) = self.workloads.get(pid.index()) {
            h.resume();
        }
    }

    fn suspend(&mut self, pid: Pid) {
        if let Some(h) = self.workloads.get(pid.index()) {
            h.suspend();
        }
    }

    fn start_service(&mut self, _pid: Pid) {
        // Fire-and-forget; the device stays busy until the completion
        // interrupt arrives.
        if self.service_tx.send(()).is_err() {
            debug!("I/O service unavailable, completion will never arrive");
        }
    }
}

/// I/O completion service: one timed service period per request, strictly
/// sequential. Exits when the scheduler drops its sender.
fn io_service_main(latency: Duration, rx: Receiver<()>, done_tx: Sender<()>) {
    for () in rx.iter() {
        thread::sleep(latency);
        if done_tx.send(()).is_err() {
            return;
        }
    }
}

/// Run the scheduler to completion and return the run report.
pub fn run(cfg: &RuntimeConfig) -> RunReport {
    let mut kernel = Kernel::new(KernelConfig::default());

    let (app_tx, app_rx) = bounded::<AppMessage>(64);
    let (service_tx, service_rx) = bounded::<()>(cfg.apps.max(1));
    let (complete_tx, complete_rx) = bounded::<()>(cfg.apps.max(1));

    let latency = cfg.step_interval * IO_LATENCY_QUANTA;
    let io_service = thread::Builder::new()
        .name("io-service".to_string())
        .spawn(move || io_service_main(latency, service_rx, complete_tx))
        .expect("spawn io service thread");

    let specs = WorkloadSpec::for_profile(cfg.apps, cfg.profile, cfg.max_steps, cfg.step_interval);

    kernel.record_boot(specs.len());
    let mut workloads: Vec<WorkloadHandle> = Vec::with_capacity(specs.len());
    for spec in specs {
        let pid = kernel.spawn(spec.name.clone());
        workloads.push(spawn_workload(pid, spec, app_tx.clone()));
    }
    // Workload threads hold the only remaining message senders.
    drop(app_tx);

    let ticker = tick(cfg.step_interval);
    let mut reaped = vec![false; workloads.len()];

    {
        let mut fx = RuntimeFx {
            workloads: &workloads,
            service_tx: &service_tx,
        };
        kernel.dispatch(&mut fx);

        loop {
            let mut tick_pending = false;
            let mut complete_pending = false;

            select! {
                recv(app_rx) -> msg => {
                    if let Ok(m) = msg {
                        kernel.handle_message(m, &mut fx);
                    }
                }
                recv(complete_rx) -> msg => {
                    if msg.is_ok() {
                        complete_pending = true;
                    }
                }
                recv(ticker) -> msg => {
                    if msg.is_ok() {
                        tick_pending = true;
                    }
                }
                default(cfg.poll_interval) => {}
            }

            // Phase 1: drain all pending workload messages.
            for m in app_rx.try_iter() {
                kernel.handle_message(m, &mut fx);
            }

            // Phase 2: at most one completion interrupt per iteration (the
            // device is serial, so at most one can be outstanding).
            if complete_pending || complete_rx.try_recv().is_ok() {
                kernel.on_io_complete(&mut fx);
            }

            // Phase 3: timer. Coalesce a tick backlog into one, like a
            // level-triggered interrupt flag.
            while ticker.try_recv().is_ok() {
                tick_pending = true;
            }
            if tick_pending {
                kernel.on_tick(&mut fx);
            }

            // Phase 4: reap exited workloads.
            for (idx, h) in workloads.iter().enumerate() {
                if !reaped[idx] && h.is_exited() {
                    reaped[idx] = true;
                    kernel.on_exited(h.pid, &mut fx);
                }
            }

            // Phase 5: termination.
            if kernel.all_done() {
                kernel.record_all_done();
                break;
            }

            // Phase 6: keep the CPU busy if anything became ready.
            if kernel.current().is_none() {
                kernel.dispatch(&mut fx);
            }
        }
    }

    // Stop the I/O service and join everything.
    drop(service_tx);
    for h in &mut workloads {
        h.reap();
    }
    if io_service.join().is_err() {
        debug!("I/O service thread panicked");
    }

    kernel.record_shutdown();

    RunReport {
        finished: kernel.finished_count(),
        trace: kernel.trace().dump(),
    }
}
