//! Threshold-based hysteresis over a stream of pass/fail observations.
//!
//! A success resets the failure counter and vice versa, so only consecutive
//! runs count. The state starts false and stays false until
//! `success_threshold` consecutive successes have been observed — an
//! instance is never assumed healthy before evidence.

use switchyard_state::ThresholdConfig;

/// One boolean health state with consecutive-result counters.
#[derive(Debug, Clone)]
pub struct Hysteresis {
    state: bool,
    consecutive_successes: u32,
    consecutive_failures: u32,
    thresholds: ThresholdConfig,
}

impl Hysteresis {
    pub fn new(thresholds: ThresholdConfig) -> Self {
        Self {
            state: false,
            consecutive_successes: 0,
            consecutive_failures: 0,
            thresholds,
        }
    }

    /// Record one observation and return the (possibly updated) state.
    pub fn observe(&mut self, pass: bool) -> bool {
        if pass {
            self.consecutive_failures = 0;
            self.consecutive_successes += 1;
            if self.consecutive_successes >= self.thresholds.success_threshold {
                self.state = true;
            }
        } else {
            self.consecutive_successes = 0;
            self.consecutive_failures += 1;
            if self.consecutive_failures >= self.thresholds.failure_threshold {
                self.state = false;
            }
        }
        self.state
    }

    /// Current state.
    pub fn state(&self) -> bool {
        self.state
    }

    /// Force the state down and discard any success streak.
    ///
    /// Used when a liveness failure must immediately pull readiness.
    pub fn force_down(&mut self) {
        self.state = false;
        self.consecutive_successes = 0;
    }

    /// Current number of consecutive failures.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}
