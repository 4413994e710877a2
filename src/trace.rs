//! Transition trace: serializable events plus a bounded ring for replay.
//!
//! Every scheduler transition emits one [`TraceEvent`]. The `Display` form is
//! the human-readable log stream; the serde form feeds JSON dumps and test
//! assertions. Events are retained in a fixed-capacity ring; when the ring is
//! full the oldest events are evicted first.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::proc::{IoDirection, Pid};

/// One scheduler transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceEvent {
    /// Scheduler start with the configured workload count.
    Boot { apps: u32 },
    /// A workload was registered and enqueued as ready.
    Spawn { pid: Pid, name: String },
    /// A ready process was moved to RUNNING; `restore_step` and `io` echo the
    /// saved context.
    Dispatch {
        pid: Pid,
        name: String,
        restore_step: u32,
        io: Option<IoDirection>,
    },
    /// Dispatch found the ready queue empty; logged once per idle period.
    Idle,
    /// A workload reported progress.
    Progress { pid: Pid, name: String, step: u32 },
    /// Timer interrupt. `lone_runner` marks the no-preemption case where a
    /// single runnable process continues.
    TimerIrq { lone_runner: bool },
    /// I/O device signalled end of service.
    IoIrq,
    /// The running process was moved back to the ready-queue tail.
    Preempt { pid: Pid, name: String },
    /// A workload requested blocking I/O.
    Syscall {
        pid: Pid,
        name: String,
        dir: IoDirection,
    },
    /// The requesting process was suspended and marked BLOCKED.
    Block {
        pid: Pid,
        name: String,
        step: u32,
        dir: IoDirection,
    },
    /// The device began servicing a request.
    IoStart { pid: Pid, name: String },
    /// Service completed; the process returns to the ready queue.
    IoDone { pid: Pid, name: String },
    /// The workload exited; its pid was purged from every queue.
    Finished { pid: Pid, name: String },
    /// Anti-stall watchdog forced a redispatch of a stalled lone runner.
    Nudge {
        pid: Pid,
        name: String,
        stalled_ticks: u32,
    },
    /// Termination predicate satisfied.
    AllDone,
    /// Scheduler loop exited.
    Shutdown,
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEvent::Boot { apps } => {
                write!(f, "BOOT      ~~ scheduler starting ({apps} workloads)")
            }
            TraceEvent::Spawn { pid, name } => {
                write!(
                    f,
                    "SPAWN     ++ {name:<3} (pid={}) added to ready queue",
                    pid.as_u32()
                )
            }
            TraceEvent::Dispatch {
                pid,
                name,
                restore_step,
                io,
            } => {
                let rw = io.map(IoDirection::letter).unwrap_or('-');
                write!(
                    f,
                    "DISPATCH  -> {name:<3} (pid={}) [restore PC={restore_step}, RW={rw}]",
                    pid.as_u32()
                )
            }
            TraceEvent::Idle => {
                write!(f, "DISPATCH  (ready queue empty) -- waiting for next event")
            }
            TraceEvent::Progress { name, step, .. } => {
                write!(f, "PC        :: {name:<3} -> {step}")
            }
            TraceEvent::TimerIrq { lone_runner } => {
                if *lone_runner {
                    write!(f, "IRQ0      ** time-slice over -- single runnable continues")
                } else {
                    write!(f, "IRQ0      ** time-slice over")
                }
            }
            TraceEvent::IoIrq => write!(f, "IRQ1      ** device signals end of I/O"),
            TraceEvent::Preempt { name, .. } => {
                write!(f, "PREEMPT   <- {name:<3} (back to ready queue)")
            }
            TraceEvent::Syscall { name, dir, .. } => {
                let verb = match dir {
                    IoDirection::Read => "READ",
                    IoDirection::Write => "WRITE",
                };
                write!(f, "SYSCALL   !! {name:<3} requests I/O ({verb})")
            }
            TraceEvent::Block {
                name, step, dir, ..
            } => {
                write!(
                    f,
                    "BLOCK     .. {name:<3} blocked on I/O [ctx: PC={step}, RW={}]",
                    dir.letter()
                )
            }
            TraceEvent::IoStart { pid, name } => {
                write!(
                    f,
                    "IO-START  >> {name:<3} (pid={}) -- device busy",
                    pid.as_u32()
                )
            }
            TraceEvent::IoDone { name, .. } => {
                write!(f, "IO-DONE   << {name:<3} released; back to ready queue")
            }
            TraceEvent::Finished { pid, name } => {
                write!(f, "FINISHED  xx {name:<3} (pid={})", pid.as_u32())
            }
            TraceEvent::Nudge {
                name,
                stalled_ticks,
                ..
            } => {
                write!(
                    f,
                    "NUDGE     !! no progress for {stalled_ticks} ticks -- reactivating {name}"
                )
            }
            TraceEvent::AllDone => {
                write!(f, "ALL-DONE  == every workload finished; stopping scheduler")
            }
            TraceEvent::Shutdown => write!(f, "SHUTDOWN  ~~ scheduler stopped"),
        }
    }
}

/// Fixed-capacity ring buffer of trace events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TraceRing {
    cap: usize,
    buf: VecDeque<TraceEvent>,
}

impl TraceRing {
    /// Create a trace ring with at least one slot.
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            cap,
            buf: VecDeque::with_capacity(cap),
        }
    }

    #[inline(always)]
    pub fn cap(&self) -> usize {
        self.cap
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Push a new event, evicting the oldest if at capacity.
    pub fn push(&mut self, ev: TraceEvent) {
        if self.buf.len() == self.cap {
            self.buf.pop_front();
        }
        self.buf.push_back(ev);
    }

    /// Snapshot the ring contents in chronological order.
    pub fn dump(&self) -> Vec<TraceEvent> {
        self.buf.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TraceEvent> {
        self.buf.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_evicts_oldest_first() {
        let mut ring = TraceRing::new(2);
        ring.push(TraceEvent::Boot { apps: 3 });
        ring.push(TraceEvent::Idle);
        ring.push(TraceEvent::AllDone);

        assert_eq!(ring.len(), 2);
        assert_eq!(ring.dump(), vec![TraceEvent::Idle, TraceEvent::AllDone]);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let ring = TraceRing::new(0);
        assert_eq!(ring.cap(), 1);
    }

    #[test]
    fn dispatch_line_shows_restore_context() {
        let ev = TraceEvent::Dispatch {
            pid: Pid::from_u32(1),
            name: "A2".to_string(),
            restore_step: 7,
            io: Some(IoDirection::Write),
        };
        let line = ev.to_string();
        assert!(line.contains("restore PC=7"));
        assert!(line.contains("RW=W"));
    }

    #[test]
    fn events_round_trip_through_json() {
        let ev = TraceEvent::Block {
            pid: Pid::from_u32(0),
            name: "A1".to_string(),
            step: 3,
            dir: IoDirection::Read,
        };
        let json = serde_json::to_string(&ev).unwrap();
        let back: TraceEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(ev, back);
    }
}
