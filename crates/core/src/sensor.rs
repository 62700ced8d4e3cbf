//! Sensor documents and the heartbeat metadata they are built from.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::liveness::{lenient_timestamp, LivenessStatus, StatusReason};

/// Per-interface traffic counters, e.g. `{"eth0": {"rx_bytes": 10}}`.
pub type TrafficCounters = BTreeMap<String, BTreeMap<String, u64>>;

/// Identity, capability and metrics fields pushed by a heartbeat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorMetadata {
    pub hostname: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub ip_mgmt: Option<String>,
    #[serde(default)]
    pub ifaces: Vec<String>,
    #[serde(default)]
    pub engine_versions: BTreeMap<String, String>,
    #[serde(default)]
    pub auth: BTreeMap<String, String>,
    #[serde(default)]
    pub rule_version: Option<String>,
    #[serde(default)]
    pub cpu_pct: f64,
    #[serde(default)]
    pub mem_pct: f64,
    #[serde(default)]
    pub disk_free_gb: f64,
    #[serde(default)]
    pub traffic: TrafficCounters,
    #[serde(default)]
    pub alerts_window: Option<serde_json::Value>,
    #[serde(default)]
    pub last_rule_update: Option<String>,
    #[serde(default)]
    pub heartbeat_interval_s: Option<u64>,
    #[serde(default)]
    pub status_interval_s: Option<u64>,
}

/// One registered probe.
///
/// Every optional field is explicit and defaults are assigned in
/// [`Sensor::new`], never at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub sensor_id: String,
    #[serde(flatten)]
    pub metadata: SensorMetadata,

    pub enrolled_at: DateTime<Utc>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub suppress_alerts: bool,
    #[serde(default)]
    pub maintenance_until: Option<DateTime<Utc>>,

    pub status: LivenessStatus,
    pub status_reason: StatusReason,
    /// Last status the sensor reported about itself.
    #[serde(default)]
    pub reported_status: Option<LivenessStatus>,
    #[serde(default)]
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub last_status_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dormant_since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub inactive_since: Option<DateTime<Utc>>,

    #[serde(default)]
    pub rule_versions: BTreeSet<String>,
    #[serde(default)]
    pub desired_rule_versions: BTreeSet<String>,
    #[serde(default)]
    pub desired_rule_updated_at: Option<DateTime<Utc>>,
}

impl Sensor {
    /// A never-seen sensor: `inactive` / `never_seen`, no versions.
    pub fn new(sensor_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            metadata: SensorMetadata::default(),
            enrolled_at: now,
            disabled: false,
            suppress_alerts: false,
            maintenance_until: None,
            status: LivenessStatus::Inactive,
            status_reason: StatusReason::NeverSeen,
            reported_status: None,
            last_heartbeat: None,
            last_status_at: None,
            dormant_since: None,
            inactive_since: None,
            rule_versions: BTreeSet::new(),
            desired_rule_versions: BTreeSet::new(),
            desired_rule_updated_at: None,
        }
    }

    /// Versions the console wants but the sensor has not installed, sorted.
    pub fn missing_rule_versions(&self) -> Vec<String> {
        self.desired_rule_versions
            .difference(&self.rule_versions)
            .cloned()
            .collect()
    }

    /// Overwrite identity/metrics fields from a heartbeat.
    ///
    /// Liveness fields are left untouched.
    /// `enrolled_at` is only honoured on the very first heartbeat.
    pub fn apply_heartbeat(
        &mut self,
        metadata: SensorMetadata,
        enrolled_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) {
        if let (Some(enrolled_at), None) = (enrolled_at, self.last_heartbeat) {
            self.enrolled_at = enrolled_at;
        }
        self.metadata = metadata;
        self.last_heartbeat = Some(now);
    }

    /// Move the cached status to `status`, maintaining the `*_since` markers.
    ///
    /// `Active` clears both markers; demotions only set a marker that is not
    /// already present.
    pub fn transition_to(&mut self, status: LivenessStatus, now: DateTime<Utc>) {
        match status {
            LivenessStatus::Active => {
                self.dormant_since = None;
                self.inactive_since = None;
            }
            LivenessStatus::Dormant => {
                self.dormant_since.get_or_insert(now);
            }
            LivenessStatus::Inactive => {
                self.inactive_since.get_or_insert(now);
            }
        }
        self.status = status;
    }

    /// Apply a self-reported status.
    ///
    /// Unlike timer demotions, an explicit `dormant` or `inactive` report
    /// stamps its marker with the report time.
    pub fn record_report(&mut self, status: LivenessStatus, now: DateTime<Utc>) {
        self.last_status_at = Some(now);
        self.reported_status = Some(status);
        self.status_reason = StatusReason::for_report(status);
        match status {
            LivenessStatus::Active => {}
            LivenessStatus::Dormant => self.dormant_since = Some(now),
            LivenessStatus::Inactive => self.inactive_since = Some(now),
        }
        self.transition_to(status, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn new_sensor_is_never_seen() {
        let s = Sensor::new("s1", Utc::now());
        assert_eq!(s.status, LivenessStatus::Inactive);
        assert_eq!(s.status_reason, StatusReason::NeverSeen);
        assert!(s.last_status_at.is_none());
    }

    #[test]
    fn missing_is_set_difference() {
        let mut s = Sensor::new("s1", Utc::now());
        s.desired_rule_versions = set(&["A", "B"]);
        s.rule_versions = set(&["A"]);
        assert_eq!(s.missing_rule_versions(), vec!["B".to_string()]);

        s.rule_versions = set(&["A", "B", "C"]);
        assert!(s.missing_rule_versions().is_empty());
    }

    #[test]
    fn transition_keeps_first_marker() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(30);
        let mut s = Sensor::new("s1", t0);

        s.transition_to(LivenessStatus::Dormant, t0);
        s.transition_to(LivenessStatus::Dormant, t1);
        assert_eq!(s.dormant_since, Some(t0));

        s.transition_to(LivenessStatus::Active, t1);
        assert_eq!(s.dormant_since, None);
        assert_eq!(s.inactive_since, None);
    }

    #[test]
    fn explicit_report_restamps_marker() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(300);
        let mut s = Sensor::new("s1", t0);

        s.record_report(LivenessStatus::Inactive, t0);
        assert_eq!(s.inactive_since, Some(t0));
        assert_eq!(s.status_reason, StatusReason::ManualInactive);

        s.record_report(LivenessStatus::Inactive, t1);
        assert_eq!(s.inactive_since, Some(t1));
        assert_eq!(s.last_status_at, Some(t1));

        s.record_report(LivenessStatus::Active, t1);
        assert_eq!(s.inactive_since, None);
        assert_eq!(s.status_reason, StatusReason::Ok);
    }

    #[test]
    fn unparsable_last_status_at_loads_as_absent() {
        let mut doc = serde_json::to_value(Sensor::new("s1", Utc::now())).unwrap();
        doc["last_status_at"] = serde_json::json!("yesterday-ish");
        let s: Sensor = serde_json::from_value(doc).unwrap();
        assert!(s.last_status_at.is_none());
    }
}
