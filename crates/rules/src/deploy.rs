//! Additive deployment of a built rule set to a sensor cohort.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::info;

use fleet_core::{FleetError, RuleSetStatus, RuleSetVersion};

use crate::RuleCatalog;

/// Which sensors receive the version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", content = "sensors", rename_all = "lowercase")]
pub enum DeployTarget {
    All,
    List(BTreeSet<String>),
}

impl DeployTarget {
    fn includes(&self, sensor_id: &str) -> bool {
        match self {
            Self::All => true,
            Self::List(ids) => ids.contains(sensor_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployOutcome {
    pub rule_set_version: String,
    pub matched_sensors: usize,
    pub modified_sensors: usize,
}

impl RuleCatalog {
    /// Mark `version` desired on every sensor in `target`.
    ///
    /// Desired versions only grow: a sensor that already wants `version`
    /// counts as matched but not modified.
    pub fn deploy(&self, version: &str, target: &DeployTarget) -> Result<DeployOutcome, FleetError> {
        let version = RuleSetVersion::parse(version)?;
        let set = self
            .store
            .get_rule_set(version.as_str())
            .ok_or_else(|| FleetError::rule_set_not_found(version.as_str()))?;

        let deployable = matches!(
            set.status,
            RuleSetStatus::Built | RuleSetStatus::Ready | RuleSetStatus::Deployed
        );
        if !deployable || set.archive().is_none() {
            return Err(FleetError::PreconditionFailed(format!(
                "rule set {} has no built archive (status {})",
                version, set.status
            )));
        }

        let now = self.clock.now();
        self.store
            .update_rule_set(version.as_str(), |s| {
                s.active = true;
                s.status = RuleSetStatus::Deployed;
                s.deployed_at = Some(now);
            })?
            .ok_or_else(|| FleetError::rule_set_not_found(version.as_str()))?;

        let result = self.store.update_sensors_where(
            |sensor| target.includes(&sensor.sensor_id),
            |sensor| {
                let added = sensor.desired_rule_versions.insert(version.to_string());
                if added {
                    sensor.desired_rule_updated_at = Some(now);
                }
                added
            },
        )?;

        info!(
            version = %version,
            matched = result.matched,
            modified = result.modified,
            "rule set deployed"
        );
        Ok(DeployOutcome {
            rule_set_version: version.into_string(),
            matched_sensors: result.matched,
            modified_sensors: result.modified,
        })
    }
}
