//! Per-sensor liveness timers.
//!
//! Each sensor owns at most two pending timers: one that demotes it to
//! `dormant` and one that demotes it to `inactive`. Both are replaced as a
//! pair whenever the sensor reports or is checked on demand. The timers are
//! a cache over `last_status_at`; nothing here is persisted, and a restarted
//! console relies on the next report or check to re-arm them.

mod core;


pub use self::core::{LivenessScheduler, FIRE_SLACK};
