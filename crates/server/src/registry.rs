//! Sensor registry: heartbeats, status reports and on-demand checks.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use fleet_core::{Clock, FleetError, LivenessStatus, Sensor, SensorMetadata, StatusReason};
use fleet_storage::FleetStore;

use crate::scheduler::LivenessScheduler;

/// Identity and metrics push. Liveness is not touched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub sensor_id: String,
    #[serde(flatten)]
    pub metadata: SensorMetadata,
    /// Honoured only on the first heartbeat.
    #[serde(default)]
    pub enrolled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct HeartbeatAck {
    pub ok: bool,
    pub sensor_id: String,
    pub at: DateTime<Utc>,
}

/// Liveness ping carrying the installed rule versions.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct StatusReport {
    pub sensor_id: String,
    #[serde(default = "default_reported_status")]
    pub status: String,
    /// Latest installed version (older agents send only this).
    #[serde(default)]
    pub rule_version: Option<String>,
    #[serde(default)]
    pub rule_versions: Vec<String>,
}

fn default_reported_status() -> String {
    LivenessStatus::Active.as_str().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct StatusOutcome {
    pub ok: bool,
    pub sensor_id: String,
    #[schema(value_type = String)]
    pub status: LivenessStatus,
    #[schema(value_type = String)]
    pub status_reason: StatusReason,
    pub at: DateTime<Utc>,
    pub installed_rule_versions: Vec<String>,
    pub desired_rule_versions: Vec<String>,
    pub missing_rule_versions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct CheckNowOutcome {
    pub ok: bool,
    pub sensor_id: String,
    #[schema(value_type = String)]
    pub status: LivenessStatus,
    pub last_status_at: Option<DateTime<Utc>>,
    pub checked_at: DateTime<Utc>,
}

/// Stored sensor plus the status recomputed at read time.
#[derive(Debug, Clone, Serialize)]
pub struct SensorView {
    #[serde(flatten)]
    pub sensor: Sensor,
    pub computed_status: LivenessStatus,
    pub missing_rule_versions: Vec<String>,
}

pub struct SensorRegistry {
    store: Arc<FleetStore>,
    clock: Arc<dyn Clock>,
    scheduler: LivenessScheduler,
}

impl SensorRegistry {
    pub fn new(store: Arc<FleetStore>, clock: Arc<dyn Clock>, scheduler: LivenessScheduler) -> Self {
        Self {
            store,
            clock,
            scheduler,
        }
    }

    pub fn scheduler(&self) -> &LivenessScheduler {
        &self.scheduler
    }

    /// Upsert identity and metrics. A first heartbeat seeds the sensor as
    /// `inactive` / `never_seen`.
    pub fn heartbeat(&self, req: HeartbeatRequest) -> Result<HeartbeatAck, FleetError> {
        let now = self.clock.now();
        let HeartbeatRequest {
            sensor_id,
            metadata,
            enrolled_at,
        } = req;
        let first = self.store.upsert_sensor(&sensor_id, now, |sensor| {
            let first = sensor.last_heartbeat.is_none();
            sensor.apply_heartbeat(metadata, enrolled_at, now);
            first
        })?;
        if first {
            info!(sensor_id = %sensor_id, "sensor enrolled");
        }
        Ok(HeartbeatAck {
            ok: true,
            sensor_id,
            at: now,
        })
    }

    /// Record a self-reported status and return what the sensor is missing.
    ///
    /// The reported status is applied immediately and both timers are
    /// re-armed from this report.
    pub fn status_report(&self, req: StatusReport) -> Result<StatusOutcome, FleetError> {
        let reported: LivenessStatus = req
            .status
            .parse()
            .map_err(FleetError::PreconditionFailed)?;
        let now = self.clock.now();
        let reason = StatusReason::for_report(reported);

        let outcome = self.store.upsert_sensor(&req.sensor_id, now, |sensor| {
            let installed: BTreeSet<String> = if !req.rule_versions.is_empty() {
                req.rule_versions.iter().cloned().collect()
            } else if let Some(v) = &req.rule_version {
                BTreeSet::from([v.clone()])
            } else {
                sensor.rule_versions.clone()
            };

            sensor.rule_versions = installed;
            if req.rule_version.is_some() {
                sensor.metadata.rule_version = req.rule_version.clone();
            }
            sensor.record_report(reported, now);

            StatusOutcome {
                ok: true,
                sensor_id: sensor.sensor_id.clone(),
                status: sensor.status,
                status_reason: reason,
                at: now,
                installed_rule_versions: sensor.rule_versions.iter().cloned().collect(),
                desired_rule_versions: sensor.desired_rule_versions.iter().cloned().collect(),
                missing_rule_versions: sensor.missing_rule_versions(),
            }
        })?;

        self.scheduler.reschedule(&req.sensor_id, Some(now));
        info!(
            sensor_id = %req.sensor_id,
            status = %reported,
            missing = outcome.missing_rule_versions.len(),
            "status reported"
        );
        Ok(outcome)
    }

    /// Recompute the status right now and re-arm the timers.
    pub fn check_now(&self, sensor_id: &str) -> Result<CheckNowOutcome, FleetError> {
        let now = self.clock.now();
        let thresholds = self.scheduler.thresholds();
        let outcome = self
            .store
            .update_sensor(sensor_id, |sensor| {
                let before = sensor.clone();
                let status = thresholds.effective(sensor.last_status_at, sensor.reported_status, now);
                sensor.transition_to(status, now);
                let outcome = CheckNowOutcome {
                    ok: true,
                    sensor_id: sensor.sensor_id.clone(),
                    status,
                    last_status_at: sensor.last_status_at,
                    checked_at: now,
                };
                (*sensor != before, outcome)
            })?
            .ok_or_else(|| FleetError::sensor_not_found(sensor_id))?;

        self.scheduler.reschedule(sensor_id, outcome.last_status_at);
        info!(sensor_id, status = %outcome.status, "status checked");
        Ok(outcome)
    }

    pub fn get(&self, sensor_id: &str) -> Result<SensorView, FleetError> {
        self.store
            .get_sensor(sensor_id)
            .map(|s| self.view(s))
            .ok_or_else(|| FleetError::sensor_not_found(sensor_id))
    }

    pub fn list(&self) -> Vec<SensorView> {
        self.store
            .list_sensors()
            .into_iter()
            .map(|s| self.view(s))
            .collect()
    }

    fn view(&self, sensor: Sensor) -> SensorView {
        let computed_status = self.scheduler.thresholds().effective(
            sensor.last_status_at,
            sensor.reported_status,
            self.clock.now(),
        );
        SensorView {
            missing_rule_versions: sensor.missing_rule_versions(),
            computed_status,
            sensor,
        }
    }
}
