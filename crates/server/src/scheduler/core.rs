//! [`LivenessScheduler`]: cancellable delayed demotions keyed by sensor id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use fleet_core::{Clock, LivenessStatus, LivenessThresholds};
use fleet_storage::FleetStore;

/// Added to every delay so a timer wakes strictly past its threshold.
/// The status function is inclusive at the boundary.
pub const FIRE_SLACK: Duration = Duration::from_millis(1);

/// The timers armed by one report or check.
struct SensorTimers {
    generation: u64,
    /// `last_status_at` the deadlines are measured from.
    armed_from: Option<DateTime<Utc>>,
    handles: Vec<JoinHandle<()>>,
}

impl SensorTimers {
    fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

#[derive(Default)]
struct TimerTable {
    last_generation: u64,
    sensors: HashMap<String, SensorTimers>,
}

impl TimerTable {
    fn is_current(&self, sensor_id: &str, generation: u64) -> bool {
        self.sensors.get(sensor_id).map(|t| t.generation) == Some(generation)
    }
}

/// What a fired timer found in the stored document.
enum Flip {
    Applied,
    /// Fresh status is still better than the target; its deadline measured
    /// from this `last_status_at` has not been reached on the wall clock.
    Early(DateTime<Utc>),
    Settled,
}

struct Inner {
    store: Arc<FleetStore>,
    clock: Arc<dyn Clock>,
    thresholds: LivenessThresholds,
    timers: Mutex<TimerTable>,
}

impl Inner {
    fn lock_timers(&self) -> MutexGuard<'_, TimerTable> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn threshold_for(&self, target: LivenessStatus) -> Duration {
        match target {
            LivenessStatus::Dormant => self.thresholds.dormant_after,
            _ => self.thresholds.inactive_after,
        }
    }

    /// Timer body: recompute the status and apply `target` only if the fresh
    /// value still equals it.
    ///
    /// The document write runs on the blocking pool without the timer lock;
    /// the recompute inside `update_sensor` is what keeps a stale timer from
    /// writing. A timer that wakes before its wall-clock deadline re-arms
    /// itself from the stored `last_status_at`.
    async fn delayed_flip(
        self: Arc<Self>,
        sensor_id: String,
        generation: u64,
        target: LivenessStatus,
    ) {
        if !self.lock_timers().is_current(&sensor_id, generation) {
            debug!(sensor_id = %sensor_id, %target, "superseded timer ignored");
            return;
        }

        let now = self.clock.now();
        let store = Arc::clone(&self.store);
        let thresholds = self.thresholds;
        let id = sensor_id.clone();
        let applied = tokio::task::spawn_blocking(move || {
            store.update_sensor(&id, |sensor| {
                let fresh =
                    thresholds.effective(sensor.last_status_at, sensor.reported_status, now);
                if let (true, Some(last)) = (fresh < target, sensor.last_status_at) {
                    return (false, Flip::Early(last));
                }
                if fresh != target || sensor.status == target {
                    return (false, Flip::Settled);
                }
                sensor.transition_to(target, now);
                (true, Flip::Applied)
            })
        })
        .await;

        let flip = match applied {
            Ok(Ok(Some(flip))) => flip,
            Ok(Ok(None)) => {
                debug!(sensor_id = %sensor_id, "timer fired for unknown sensor");
                Flip::Settled
            }
            Ok(Err(e)) => {
                warn!(sensor_id = %sensor_id, error = %e, "liveness demotion not persisted");
                Flip::Settled
            }
            Err(e) => {
                warn!(sensor_id = %sensor_id, error = %e, "liveness demotion task failed");
                Flip::Settled
            }
        };

        let mut timers = self.lock_timers();
        if !timers.is_current(&sensor_id, generation) {
            debug!(sensor_id = %sensor_id, %target, "timers replaced during demotion");
            return;
        }
        match flip {
            Flip::Applied => info!(sensor_id = %sensor_id, status = %target, "liveness demoted"),
            Flip::Settled => {
                debug!(sensor_id = %sensor_id, %target, "timer found status already moved on")
            }
            Flip::Early(last) => {
                let delay = remaining(last, self.threshold_for(target), self.clock.now())
                    .unwrap_or(Duration::ZERO);
                debug!(sensor_id = %sensor_id, %target, ?delay, "timer woke early, re-armed");
                let handle = arm(&self, &sensor_id, generation, target, delay);
                if let Some(entry) = timers.sensors.get_mut(&sensor_id) {
                    entry.handles.retain(|h| !h.is_finished());
                    entry.handles.push(handle);
                    entry.armed_from = entry.armed_from.max(Some(last));
                }
                return;
            }
        }

        if target == LivenessStatus::Inactive {
            timers.sensors.remove(&sensor_id);
        }
    }
}

/// Spawn one demotion timer that wakes `delay` (plus slack) from now.
fn arm(
    inner: &Arc<Inner>,
    sensor_id: &str,
    generation: u64,
    target: LivenessStatus,
    delay: Duration,
) -> JoinHandle<()> {
    let inner = Arc::clone(inner);
    let id = sensor_id.to_string();
    tokio::spawn(async move {
        tokio::time::sleep(delay + FIRE_SLACK).await;
        inner.delayed_flip(id, generation, target).await;
    })
}

/// Owns every pending liveness timer. Cheap to clone.
#[derive(Clone)]
pub struct LivenessScheduler {
    inner: Arc<Inner>,
}

impl LivenessScheduler {
    pub fn new(
        store: Arc<FleetStore>,
        clock: Arc<dyn Clock>,
        thresholds: LivenessThresholds,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                clock,
                thresholds,
                timers: Mutex::new(TimerTable::default()),
            }),
        }
    }

    pub fn thresholds(&self) -> LivenessThresholds {
        self.inner.thresholds
    }

    /// Cancel the sensor's pending timers and arm a fresh pair measured from
    /// `last_status_at`. Deadlines already in the past are not armed.
    ///
    /// A `last_status_at` older than the one the current timers were armed
    /// from is ignored.
    ///
    /// Must be called from within a tokio runtime.
    pub fn reschedule(&self, sensor_id: &str, last_status_at: Option<DateTime<Utc>>) {
        let now = self.inner.clock.now();
        let mut timers = self.inner.lock_timers();
        let armed_from = timers.sensors.get(sensor_id).and_then(|t| t.armed_from);
        if let (Some(last), Some(armed)) = (last_status_at, armed_from) {
            if last < armed {
                debug!(sensor_id, %last, %armed, "stale reschedule ignored");
                return;
            }
        }
        timers.last_generation += 1;
        let generation = timers.last_generation;

        let mut handles = Vec::with_capacity(2);
        if let Some(last) = last_status_at {
            for target in [LivenessStatus::Dormant, LivenessStatus::Inactive] {
                let Some(delay) = remaining(last, self.inner.threshold_for(target), now) else {
                    continue;
                };
                handles.push(arm(&self.inner, sensor_id, generation, target, delay));
            }
        }

        let armed = handles.len();
        if let Some(previous) = timers.sensors.insert(
            sensor_id.to_string(),
            SensorTimers {
                generation,
                armed_from: last_status_at,
                handles,
            },
        ) {
            previous.abort();
        }
        debug!(sensor_id, generation, armed, "liveness timers rescheduled");
    }

    /// Number of sensors with armed timers.
    pub fn tracked_sensors(&self) -> usize {
        self.inner.lock_timers().sensors.len()
    }

    /// Abort every pending timer.
    pub fn shutdown(&self) {
        let mut timers = self.inner.lock_timers();
        let count = timers.sensors.len();
        for (_, pending) in timers.sensors.drain() {
            pending.abort();
        }
        info!(sensors = count, "liveness timers cancelled");
    }
}

/// Time left until `last + threshold`, or `None` when it has passed.
fn remaining(last: DateTime<Utc>, threshold: Duration, now: DateTime<Utc>) -> Option<Duration> {
    let threshold = chrono::Duration::from_std(threshold).ok()?;
    (last + threshold - now).to_std().ok()
}
