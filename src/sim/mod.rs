//! Deterministic simulation harness for the scheduler core.
//!
//! The harness drives the same [`crate::kernel::Kernel`] as the threaded
//! runtime, but over virtual time: workloads are modeled as step programs,
//! I/O completions are scheduled at `now + latency`, and safety/liveness
//! invariants are checked after every tick.

pub mod clock;
pub mod runner;

pub use clock::SimClock;
pub use runner::{
    FailureKind, FailureReport, RunOutcome, SimConfig, SimReport, SimRunner, SimWorkloadSpec,
};
