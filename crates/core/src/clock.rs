//! Wall-clock sources for liveness evaluation.
//!
//! Liveness is computed from stored `DateTime<Utc>` timestamps, while timers
//! sleep on tokio's monotonic clock. [`TokioClock`] ties the two together so
//! that a paused tokio runtime also freezes `now()`.

use chrono::{DateTime, Utc};

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Plain system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall clock anchored on `tokio::time::Instant`.
///
/// `now()` is the anchor wall time plus the tokio-elapsed time since the
/// anchor, so `tokio::time::advance` and auto-advance in paused tests move
/// it forward in lockstep with sleeping timers.
#[derive(Debug, Clone)]
pub struct TokioClock {
    anchor_wall: DateTime<Utc>,
    anchor_instant: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(anchor_wall: DateTime<Utc>) -> Self {
        Self {
            anchor_wall,
            anchor_instant: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.anchor_instant.elapsed();
        let elapsed = chrono::Duration::from_std(elapsed).unwrap_or(chrono::Duration::zero());
        self.anchor_wall + elapsed
    }
}
