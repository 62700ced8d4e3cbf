//! Read-only views over the catalogue.

use serde::Serialize;

use fleet_core::{FleetError, RuleSet, RuleSetVersion};

use crate::RuleCatalog;

/// Slim item projection for version listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleItemView {
    pub sid: u64,
    pub rev: u32,
    pub msg: String,
    pub rule_hash: String,
    pub rule_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledRuleSet {
    pub version: String,
    /// `None` when the console has no record of the version.
    pub item_count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorRuleStats {
    pub sensor_id: String,
    pub installed: Vec<InstalledRuleSet>,
    pub missing: Vec<String>,
    pub total_rules: usize,
}

impl RuleCatalog {
    /// Newest version first.
    pub fn list_rule_sets(&self) -> Vec<RuleSet> {
        let mut sets = self.store.list_rule_sets();
        sets.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.version.cmp(&a.version)));
        sets
    }

    pub fn items_for_version(&self, version: &str) -> Result<Vec<RuleItemView>, FleetError> {
        let version = RuleSetVersion::parse(version)?;
        if !self.store.rule_set_exists(version.as_str()) {
            return Err(FleetError::rule_set_not_found(version.as_str()));
        }
        Ok(self
            .store
            .rule_items_for_version(version.as_str())
            .into_iter()
            .map(|item| RuleItemView {
                sid: item.sid,
                rev: item.rev,
                msg: item.msg,
                rule_hash: item.rule_hash,
                rule_text: item.rule_text,
            })
            .collect())
    }

    pub fn sensor_rule_stats(&self, sensor_id: &str) -> Result<SensorRuleStats, FleetError> {
        let sensor = self
            .store
            .get_sensor(sensor_id)
            .ok_or_else(|| FleetError::sensor_not_found(sensor_id))?;

        let installed: Vec<InstalledRuleSet> = sensor
            .rule_versions
            .iter()
            .map(|v| InstalledRuleSet {
                version: v.clone(),
                item_count: self.store.get_rule_set(v).map(|s| s.item_count),
            })
            .collect();
        let total_rules = installed.iter().filter_map(|i| i.item_count).sum();

        Ok(SensorRuleStats {
            sensor_id: sensor.sensor_id.clone(),
            missing: sensor.missing_rule_versions(),
            installed,
            total_rules,
        })
    }
}
