//! Event conversion: indicators -> rule items -> draft rule set.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use fleet_core::{
    FleetError, RuleItem, RuleProvenance, RuleSet, RuleSetFiles, RuleSetLink, RuleSetStatus,
};

use crate::compiler::{rule_hash, Indicator};
use crate::RuleCatalog;

/// The intelligence event the indicators belong to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRef {
    pub event_id: u64,
    #[serde(default)]
    pub uuid: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionStatus {
    Ok,
    Noop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionOutcome {
    pub status: ConversionStatus,
    pub event_id: u64,
    pub set_id: Option<Uuid>,
    pub version: Option<String>,
    /// Items linked into the new set.
    pub count: usize,
    /// Items that did not exist in the catalogue before.
    pub created_items: usize,
}

impl ConversionOutcome {
    fn noop(event_id: u64) -> Self {
        Self {
            status: ConversionStatus::Noop,
            event_id,
            set_id: None,
            version: None,
            count: 0,
            created_items: 0,
        }
    }
}

impl RuleCatalog {
    /// Compile the convertible indicators of one event into a draft set.
    ///
    /// Items are deduplicated by rule hash across events; an indicator that
    /// was converted before links the existing item and keeps its sid.
    pub fn convert_event(
        &self,
        event: &EventRef,
        indicators: &[Indicator],
    ) -> Result<ConversionOutcome, FleetError> {
        let now = self.clock.now();
        let mut items: Vec<RuleItem> = Vec::new();
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut created_items = 0;

        for indicator in indicators.iter().filter(|i| i.is_convertible()) {
            let Some(body) = self.compiler.compile(indicator) else {
                warn!(
                    event_id = event.event_id,
                    indicator_type = %indicator.indicator_type,
                    "indicator could not be compiled, skipping"
                );
                continue;
            };
            let hash = rule_hash(indicator, &body);
            let upsert = self
                .store
                .upsert_rule_item_by_hash(&hash, self.config.sid_start, |sid| RuleItem {
                    id: Uuid::new_v4(),
                    gid: 1,
                    sid,
                    rev: 1,
                    msg: body.msg.clone(),
                    rule_text: body.render(sid, 1),
                    rule_hash: hash.clone(),
                    protocol: body.protocol.clone(),
                    src_sel: body.src_sel.clone(),
                    dst_sel: body.dst_sel.clone(),
                    keywords: body.keywords.clone(),
                    metadata: RuleProvenance {
                        event_id: indicator.event_id.or(Some(event.event_id)),
                        attr_id: indicator.attr_id.clone(),
                        indicator_type: Some(indicator.kind()),
                        pulled_at: indicator.pulled_at.clone(),
                    },
                    created_at: now,
                })?;

            if upsert.created {
                created_items += 1;
                debug!(sid = upsert.item.sid, rule_hash = %hash, "rule item created");
            }
            if seen.insert(upsert.item.id) {
                items.push(upsert.item);
            }
        }

        if items.is_empty() {
            info!(event_id = event.event_id, "no convertible indicators");
            return Ok(ConversionOutcome::noop(event.event_id));
        }

        let engine = self.config.engine.clone();
        let set = self.store.create_rule_set(now, event.event_id, |version| {
            let set = RuleSet {
                id: Uuid::new_v4(),
                name: format!("misp-event-{}", event.event_id),
                version: version.to_string(),
                event_id: event.event_id,
                event_uuid: event.uuid.clone(),
                engine,
                item_count: items.len(),
                status: RuleSetStatus::Draft,
                active: false,
                created_at: now,
                build_time: None,
                deployed_at: None,
                files: RuleSetFiles::default(),
                notes: None,
            };
            let links = items
                .iter()
                .map(|item| RuleSetLink {
                    set_id: set.id,
                    item_id: item.id,
                    set_version: version.to_string(),
                    gid: item.gid,
                    sid: item.sid,
                    rev: item.rev,
                })
                .collect();
            (set, links)
        })?;

        info!(
            event_id = event.event_id,
            version = %set.version,
            items = set.item_count,
            created_items,
            "rule set drafted"
        );
        Ok(ConversionOutcome {
            status: ConversionStatus::Ok,
            event_id: event.event_id,
            set_id: Some(set.id),
            version: Some(set.version),
            count: set.item_count,
            created_items,
        })
    }
}
