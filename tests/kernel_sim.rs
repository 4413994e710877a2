//! Deterministic scenario tests for the scheduler core.
//!
//! Each test drives the kernel through the virtual-time harness; the runner
//! checks the safety and fairness oracles on every tick, so a passing run
//! also certifies mutual exclusion, queue disjointness, and exact-once
//! finish accounting throughout.

use schedsim_rs::sim::{RunOutcome, SimConfig, SimRunner, SimWorkloadSpec};
use schedsim_rs::{Pid, TraceEvent};

fn cpu_specs(n: usize, max_steps: u32) -> Vec<SimWorkloadSpec> {
    (1..=n)
        .map(|i| SimWorkloadSpec::cpu_bound(format!("A{i}"), max_steps))
        .collect()
}

/// Reference scenario: 3 workloads, no I/O, step bound 15, 1-unit quantum.
/// Round robin interleaves them and all three finish.
#[test]
fn three_cpu_bound_workloads_terminate() {
    let report = SimRunner::new(cpu_specs(3, 15), SimConfig::default())
        .run()
        .expect_ok();

    assert_eq!(report.finished, 3);
    assert!(report.service_order.is_empty());
    // Preemption happened once contention existed.
    assert!(report
        .trace
        .iter()
        .any(|ev| matches!(ev, TraceEvent::Preempt { .. })));
    assert!(report
        .trace
        .iter()
        .any(|ev| matches!(ev, TraceEvent::AllDone)));
}

/// Under contention every workload keeps making progress: each of the three
/// reaches its final step, so preemption is fair enough to rotate all of
/// them through the CPU.
#[test]
fn round_robin_rotates_all_workloads() {
    let report = SimRunner::new(cpu_specs(3, 6), SimConfig::default())
        .run()
        .expect_ok();

    for name in ["A1", "A2", "A3"] {
        assert!(
            report.trace.iter().any(|ev| matches!(
                ev,
                TraceEvent::Progress { name: n, step: 6, .. } if n == name
            )),
            "{name} never reached its final step"
        );
    }
}

/// Reference scenario: a workload requests I/O at steps 3 and 7 with
/// latency 3; it blocks at each request, is released, and still finishes.
#[test]
fn io_workload_blocks_and_finishes() {
    let specs = vec![SimWorkloadSpec::with_io("A1", 15, vec![3, 7])];
    let report = SimRunner::new(specs, SimConfig::default()).run().expect_ok();

    assert_eq!(report.finished, 1);
    assert_eq!(
        report.service_order,
        vec![Pid::from_u32(0), Pid::from_u32(0)]
    );

    let blocks: Vec<u32> = report
        .trace
        .iter()
        .filter_map(|ev| match ev {
            TraceEvent::Block { step, .. } => Some(*step),
            _ => None,
        })
        .collect();
    assert_eq!(blocks, vec![3, 7]);

    // Each service takes the fixed latency: two services add ~6 ticks of
    // blocked time on top of the 15 steps.
    assert!(report.ticks >= 15 + 6, "run too fast: {} ticks", report.ticks);

    let io_done = report
        .trace
        .iter()
        .filter(|ev| matches!(ev, TraceEvent::IoDone { .. }))
        .count();
    assert_eq!(io_done, 2);
}

/// I/O chaining: with several workloads queued for the device, service
/// starts in strict FIFO arrival order, one at a time.
#[test]
fn queued_io_requests_are_chained_fifo() {
    // All three request I/O at their first step; arrival order follows
    // dispatch order A1, A2, A3.
    let specs = vec![
        SimWorkloadSpec::with_io("A1", 4, vec![1]),
        SimWorkloadSpec::with_io("A2", 4, vec![1]),
        SimWorkloadSpec::with_io("A3", 4, vec![1]),
    ];
    let report = SimRunner::new(specs, SimConfig::default()).run().expect_ok();

    assert_eq!(report.finished, 3);
    assert_eq!(
        report.service_order,
        vec![Pid::from_u32(0), Pid::from_u32(1), Pid::from_u32(2)]
    );
}

/// Lone-runner liveness: a workload that stops reporting progress is nudged
/// by the watchdog after exactly the threshold of stalled ticks.
#[test]
fn stalled_lone_runner_is_nudged() {
    let specs = vec![SimWorkloadSpec::stuck("A1")];
    let report = SimRunner::new(specs, SimConfig::default())
        .run_ticks(7)
        .expect("no invariant failures");

    let nudge_ticks: Vec<u32> = report
        .trace
        .iter()
        .filter_map(|ev| match ev {
            TraceEvent::Nudge { stalled_ticks, .. } => Some(*stalled_ticks),
            _ => None,
        })
        .collect();
    assert_eq!(nudge_ticks, vec![schedsim_rs::NUDGE_THRESHOLD]);
}

/// The watchdog must not fire while more than one process is ready;
/// ordinary preemption covers contention.
#[test]
fn no_nudge_under_contention() {
    let report = SimRunner::new(cpu_specs(3, 15), SimConfig::default())
        .run()
        .expect_ok();

    assert!(!report
        .trace
        .iter()
        .any(|ev| matches!(ev, TraceEvent::Nudge { .. })));
}

/// Termination: at all-done every queue is empty, the device is idle, and
/// the trace closes with ALL-DONE then SHUTDOWN.
#[test]
fn termination_leaves_no_residue() {
    let specs = vec![
        SimWorkloadSpec::cpu_bound("A1", 5),
        SimWorkloadSpec::with_io("A2", 5, vec![2]),
        SimWorkloadSpec::with_io("A3", 5, vec![4]),
    ];
    let report = SimRunner::new(specs, SimConfig::default()).run().expect_ok();

    assert_eq!(report.finished, 3);
    let n = report.trace.len();
    assert!(matches!(report.trace[n - 2], TraceEvent::AllDone));
    assert!(matches!(report.trace[n - 1], TraceEvent::Shutdown));
}

/// The split reference profile (CPU-bound A1..A3, I/O-bound A4..) completes
/// with the full six workloads.
#[test]
fn six_workload_split_profile_completes() {
    use schedsim_rs::workload::Profile;

    let specs: Vec<SimWorkloadSpec> = (1..=6)
        .map(|idx| SimWorkloadSpec {
            name: format!("A{idx}"),
            max_steps: 15,
            io_steps: Profile::Split.io_steps(idx),
            stuck: false,
        })
        .collect();
    let report = SimRunner::new(specs, SimConfig::default()).run().expect_ok();

    assert_eq!(report.finished, 6);
    // A4 makes three requests, A5 and A6 two each.
    assert_eq!(report.service_order.len(), 7);
}

/// A longer latency stretches the blocked window accordingly.
#[test]
fn latency_scales_blocked_time() {
    let cfg = SimConfig {
        io_latency: 6,
        ..SimConfig::default()
    };
    let specs = vec![SimWorkloadSpec::with_io("A1", 5, vec![1])];
    let report = SimRunner::new(specs, cfg).run().expect_ok();

    assert_eq!(report.finished, 1);
    assert!(report.ticks >= 5 + 6);
}
