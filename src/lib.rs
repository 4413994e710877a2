//! Preemptive round-robin CPU scheduler simulation with a single I/O device.
//!
//! ## Scope
//! This crate simulates the classic kernel responsibilities around one CPU
//! and one serialized I/O device: process-table maintenance, timer-driven
//! preemption, blocking I/O arbitration, stall detection, and global
//! termination. Workloads run as independent threads that report progress
//! and raise blocking I/O requests; all scheduling state is owned by a
//! single event loop.
//!
//! ## Key invariants
//! - At most one process is RUNNING and at most one is in active I/O service
//!   at any instant.
//! - Ready and I/O wait queues are FIFO and disjoint; a FINISHED pid never
//!   re-enters either.
//! - The finished counter increments exactly once per pid.
//! - The event loop never blocks indefinitely: waits are bounded so reaping
//!   and the anti-stall watchdog stay live.
//!
//! ## Event flow (one loop iteration)
//! 1) Drain workload messages (progress reports, I/O requests).
//! 2) Handle a pending I/O completion interrupt, chaining the next waiter.
//! 3) Handle the timer interrupt: preempt under contention, or run the
//!    lone-runner watchdog.
//! 4) Reap exited workloads and purge them from every queue.
//! 5) Check the all-done predicate; idle-dispatch otherwise.
//!
//! ## Notable entry points
//! - [`kernel::Kernel`]: the scheduler state machine behind the
//!   [`kernel::KernelFx`] side-effect seam.
//! - [`runtime::run`]: threaded runtime over real time.
//! - [`sim::SimRunner`]: deterministic virtual-time harness with invariant
//!   oracles.
//! - [`trace::TraceEvent`]: the human-readable and serializable transition
//!   log.

pub mod kernel;
pub mod proc;
pub mod runtime;
pub mod sim;
pub mod trace;
pub mod workload;

pub use kernel::{AppMessage, Kernel, KernelConfig, KernelFx, NUDGE_THRESHOLD};
pub use proc::{IoDirection, Pcb, Pid, ProcState, ProcTable, MAX_PROCS};
pub use runtime::{run, RunReport, RuntimeConfig, IO_LATENCY_QUANTA};
pub use trace::{TraceEvent, TraceRing};
pub use workload::{Profile, WorkloadSpec, DEFAULT_MAX_STEPS};
