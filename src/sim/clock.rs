//! Monotonic simulated clock.
//!
//! The clock only advances when the simulation explicitly moves time
//! forward, keeping tick-based logic deterministic and replayable.

use serde::{Deserialize, Serialize};

/// Tick-based simulated clock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimClock {
    now: u64,
}

impl SimClock {
    /// Create a new clock at tick 0.
    pub fn new() -> Self {
        Self { now: 0 }
    }

    /// Current time in ticks.
    #[inline(always)]
    pub fn now_ticks(&self) -> u64 {
        self.now
    }

    /// Advance by a delta, saturating on overflow.
    #[inline(always)]
    pub fn advance_by(&mut self, dt: u64) {
        self.now = self.now.saturating_add(dt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_starts_at_zero_and_advances() {
        let mut clock = SimClock::new();
        assert_eq!(clock.now_ticks(), 0);
        clock.advance_by(3);
        assert_eq!(clock.now_ticks(), 3);
    }
}
