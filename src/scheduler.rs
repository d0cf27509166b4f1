//! # Flush Scheduler
//!
//! The shared readiness predicate for both the native-bind path and the
//! textual-builder path:
//!
//! ```text
//! ready() := (row_count >= max_rows)
//!         OR (now >= next_deadline AND row_count > 0)
//! ```
//!
//! The dual trigger bounds memory (row cap) and end-to-end latency (time
//! cap) independently of the event rate. A quiet stream never busy-polls
//! the executor: an expired deadline with zero rows silently reschedules
//! instead of reporting ready.

use std::time::{Duration, Instant};

// =============================================================================
// Flush Policy
// =============================================================================

/// Per-batch-stream flush policy: size threshold OR age threshold.
///
/// One instance lives next to each pending batch. `ready()` is cheap (an
/// integer compare and a clock read) and may be polled on a timer as well
/// as after every row append.
#[derive(Debug)]
pub struct FlushPolicy {
    max_rows: usize,
    interval: Duration,
    next_deadline: Instant,
    /// Set by `force_ready`; makes the next check succeed even against an
    /// empty-looking clock. Consumed by the check that observes it.
    forced: bool,
}

impl FlushPolicy {
    /// Creates a policy with the given row cap and flush interval.
    pub fn new(max_rows: usize, interval: Duration) -> Self {
        Self {
            max_rows,
            interval,
            next_deadline: Instant::now() + interval,
            forced: false,
        }
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Time remaining until the next deadline-driven flush (zero if due).
    pub fn until_deadline(&self) -> Duration {
        self.next_deadline.saturating_duration_since(Instant::now())
    }

    /// Decides whether the batch holding `row_count` rows should flush now.
    ///
    /// If the deadline has passed but the batch is empty, the deadline is
    /// silently pushed to `now + interval` and the answer is "not ready":
    /// an idle stream must not generate empty flush attempts. A pending
    /// `force_ready` makes this check succeed even with zero rows, since
    /// drain paths need to observe readiness to run their final sweep.
    pub fn ready(&mut self, row_count: usize) -> bool {
        self.ready_at(row_count, Instant::now())
    }

    /// `ready()` against an explicit clock, for deterministic tests.
    pub fn ready_at(&mut self, row_count: usize, now: Instant) -> bool {
        if self.forced {
            self.forced = false;
            return true;
        }

        if self.max_rows > 0 && row_count >= self.max_rows {
            return true;
        }

        if now >= self.next_deadline {
            if row_count == 0 {
                // Nothing to flush: reschedule quietly.
                self.next_deadline = now + self.interval;
                return false;
            }
            return true;
        }

        false
    }

    /// Resets the deadline to `now + interval`. Called on every actual
    /// flush, whether it was triggered by size or by time.
    pub fn reset_deadline(&mut self) {
        self.next_deadline = Instant::now() + self.interval;
    }

    /// Escape hatch for shutdown/drain paths: the next readiness check
    /// succeeds regardless of row count or clock, guaranteeing no data is
    /// stranded at process stop.
    pub fn force_ready(&mut self) {
        self.forced = true;
    }
}

// =============================================================================
// Tests
// =============================================================================
