//! Sensor collection operations.

use chrono::{DateTime, Utc};
use serde::Serialize;

use fleet_core::Sensor;

use crate::error::StorageError;
use crate::store::{Collection, FleetStore};

/// Outcome of a multi-document update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkUpdate {
    pub matched: usize,
    pub modified: usize,
}

impl FleetStore {
    pub fn get_sensor(&self, sensor_id: &str) -> Option<Sensor> {
        self.read().sensors.get(sensor_id).cloned()
    }

    /// All sensors ordered by id.
    pub fn list_sensors(&self) -> Vec<Sensor> {
        self.read().sensors.values().cloned().collect()
    }

    pub fn sensor_count(&self) -> usize {
        self.read().sensors.len()
    }

    /// Read-modify-write a sensor, creating a never-seen one when absent.
    pub fn upsert_sensor<R>(
        &self,
        sensor_id: &str,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut Sensor) -> R,
    ) -> Result<R, StorageError> {
        let mut state = self.write();
        let previous = state.sensors.get(sensor_id).cloned();
        let mut sensor = previous
            .clone()
            .unwrap_or_else(|| Sensor::new(sensor_id, now));
        let out = f(&mut sensor);
        state.sensors.insert(sensor_id.to_string(), sensor);

        if let Err(e) = self.persist(&state, Collection::Sensors) {
            match previous {
                Some(old) => state.sensors.insert(sensor_id.to_string(), old),
                None => state.sensors.remove(sensor_id),
            };
            return Err(e);
        }
        Ok(out)
    }

    /// Read-modify-write an existing sensor. `Ok(None)` when it is unknown.
    ///
    /// Return `(changed, value)` from `f`; unchanged documents are not
    /// written back.
    pub fn update_sensor<R>(
        &self,
        sensor_id: &str,
        f: impl FnOnce(&mut Sensor) -> (bool, R),
    ) -> Result<Option<R>, StorageError> {
        let mut state = self.write();
        let Some(previous) = state.sensors.get(sensor_id).cloned() else {
            return Ok(None);
        };
        let mut sensor = previous.clone();
        let (changed, out) = f(&mut sensor);
        if !changed {
            return Ok(Some(out));
        }
        state.sensors.insert(sensor_id.to_string(), sensor);

        if let Err(e) = self.persist(&state, Collection::Sensors) {
            state.sensors.insert(sensor_id.to_string(), previous);
            return Err(e);
        }
        Ok(Some(out))
    }

    /// Apply `f` to every sensor matching `filter`.
    ///
    /// `f` returns whether it modified the document; the counts mirror a
    /// document database's matched/modified semantics.
    pub fn update_sensors_where(
        &self,
        filter: impl Fn(&Sensor) -> bool,
        mut f: impl FnMut(&mut Sensor) -> bool,
    ) -> Result<BulkUpdate, StorageError> {
        let mut state = self.write();
        let before = state.sensors.clone();
        let mut result = BulkUpdate::default();

        for sensor in state.sensors.values_mut().filter(|s| filter(s)) {
            result.matched += 1;
            if f(sensor) {
                result.modified += 1;
            }
        }

        if result.modified > 0 {
            if let Err(e) = self.persist(&state, Collection::Sensors) {
                state.sensors = before;
                return Err(e);
            }
        }
        Ok(result)
    }
}
