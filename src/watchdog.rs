// src/watchdog.rs

//! Inactivity watchdog for the dpkg status stream
//!
//! Maintainer scripts and slow disks can legitimately keep dpkg quiet for a
//! long time, so a stall only produces a warning; the transaction is never
//! aborted from here.

use crate::status::ProgressState;
use std::time::{Duration, Instant};
use tracing::warn;

/// Default silence allowed before a stall warning
pub const DEFAULT_WATCHDOG_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug)]
pub struct Watchdog {
    threshold: Duration,
    baseline: Instant,
    stalls: u32,
}

impl Watchdog {
    pub fn new(threshold: Duration) -> Self {
        Self::starting_at(threshold, Instant::now())
    }

    pub fn starting_at(threshold: Duration, now: Instant) -> Self {
        Self {
            threshold,
            baseline: now,
            stalls: 0,
        }
    }

    /// Number of stall warnings raised so far
    pub fn stalls(&self) -> u32 {
        self.stalls
    }

    /// Check for a stall; returns true when a warning was logged
    ///
    /// The clock only starts once the first status line arrived, and the
    /// baseline is reset after every warning.
    pub fn check(&mut self, state: &ProgressState, now: Instant) -> bool {
        if !state.started_receiving_status {
            self.baseline = now;
            return false;
        }

        if let Some(seen) = state.last_activity
            && seen > self.baseline
        {
            self.baseline = seen;
        }

        let silent_for = now.saturating_duration_since(self.baseline);
        if silent_for > self.threshold {
            warn!(
                "No status-fd updates from dpkg for {} seconds (last package: {})",
                silent_for.as_secs(),
                state.current_package.as_deref().unwrap_or("none")
            );
            self.baseline = now;
            self.stalls += 1;
            return true;
        }
        false
    }
}
