//! Rule catalogue operations: items, sets, links and the sid sequence.

use chrono::{DateTime, Utc};

use fleet_core::{FleetError, RuleItem, RuleSet, RuleSetLink, RuleSetVersion};

use crate::error::StorageError;
use crate::store::{Collection, Collections, FleetStore};

/// Result of an upsert-by-hash.
#[derive(Debug, Clone)]
pub struct RuleItemUpsert {
    pub item: RuleItem,
    /// `false` when an item with the same hash already existed.
    pub created: bool,
}

fn allocate_sid(state: &mut Collections, sid_start: u64) -> u64 {
    let next = match state.counters.sid {
        Some(last) => last + 1,
        None => sid_start,
    };
    state.counters.sid = Some(next);
    next
}

impl FleetStore {
    // ── Sid sequence ────────────────────────────────────────────

    /// Hand out the next signature id. The first id is `sid_start`.
    pub fn next_sid(&self, sid_start: u64) -> Result<u64, StorageError> {
        let mut state = self.write();
        let before = state.counters.clone();
        let sid = allocate_sid(&mut state, sid_start);
        if let Err(e) = self.persist(&state, Collection::Counters) {
            state.counters = before;
            return Err(e);
        }
        Ok(sid)
    }

    /// Raise the sequence so the next id is above every stored sid and at
    /// least `sid_start`. Returns the last-issued value now on record.
    pub fn seed_sid_counter(&self, sid_start: u64) -> Result<u64, StorageError> {
        let mut state = self.write();
        let before = state.counters.clone();
        let max_stored = state.rule_items.values().map(|i| i.sid).max();
        let floor = sid_start.saturating_sub(1);
        let last = [Some(floor), max_stored, state.counters.sid]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(floor);
        state.counters.sid = Some(last);
        if let Err(e) = self.persist(&state, Collection::Counters) {
            state.counters = before;
            return Err(e);
        }
        Ok(last)
    }

    // ── Rule items ──────────────────────────────────────────────

    pub fn find_rule_item_by_hash(&self, rule_hash: &str) -> Option<RuleItem> {
        let state = self.read();
        let id = state.items_by_hash.get(rule_hash)?;
        state.rule_items.get(id).cloned()
    }

    pub fn rule_item_count(&self) -> usize {
        self.read().rule_items.len()
    }

    /// Items ordered by sid.
    pub fn list_rule_items(&self) -> Vec<RuleItem> {
        let mut items: Vec<RuleItem> = self.read().rule_items.values().cloned().collect();
        items.sort_by_key(|i| i.sid);
        items
    }

    /// Insert a rule item unless one with `rule_hash` already exists.
    ///
    /// The hash lookup, sid allocation and insert happen under one lock, so
    /// a sid is only consumed by the call that actually creates the item.
    pub fn upsert_rule_item_by_hash(
        &self,
        rule_hash: &str,
        sid_start: u64,
        build: impl FnOnce(u64) -> RuleItem,
    ) -> Result<RuleItemUpsert, StorageError> {
        let mut state = self.write();
        if let Some(existing) = state
            .items_by_hash
            .get(rule_hash)
            .and_then(|id| state.rule_items.get(id))
        {
            return Ok(RuleItemUpsert {
                item: existing.clone(),
                created: false,
            });
        }

        let counters_before = state.counters.clone();
        let sid = allocate_sid(&mut state, sid_start);
        let mut item = build(sid);
        item.rule_hash = rule_hash.to_string();
        state.items_by_hash.insert(item.rule_hash.clone(), item.id);
        state.rule_items.insert(item.id, item.clone());

        let persisted = self
            .persist(&state, Collection::RuleItems)
            .and_then(|_| self.persist(&state, Collection::Counters));
        if let Err(e) = persisted {
            state.items_by_hash.remove(rule_hash);
            state.rule_items.remove(&item.id);
            state.counters = counters_before;
            return Err(e);
        }
        Ok(RuleItemUpsert {
            item,
            created: true,
        })
    }

    // ── Rule sets ───────────────────────────────────────────────

    pub fn get_rule_set(&self, version: &str) -> Option<RuleSet> {
        self.read().rule_sets.get(version).cloned()
    }

    pub fn rule_set_exists(&self, version: &str) -> bool {
        self.read().rule_sets.contains_key(version)
    }

    /// All rule sets ordered by version.
    pub fn list_rule_sets(&self) -> Vec<RuleSet> {
        self.read().rule_sets.values().cloned().collect()
    }

    /// Create a rule set under a freshly generated, unique version.
    ///
    /// `make` receives the version and returns the set plus its links.
    pub fn create_rule_set(
        &self,
        now: DateTime<Utc>,
        event_id: u64,
        make: impl FnOnce(&RuleSetVersion) -> (RuleSet, Vec<RuleSetLink>),
    ) -> Result<RuleSet, FleetError> {
        let mut state = self.write();
        let version =
            RuleSetVersion::generate(now, event_id, |v| state.rule_sets.contains_key(v))?;
        let (set, links) = make(&version);
        let links_before = state.links.len();
        state.rule_sets.insert(set.version.clone(), set.clone());
        state.links.extend(links);

        let persisted = self
            .persist(&state, Collection::RuleSets)
            .and_then(|_| self.persist(&state, Collection::RuleSetItems));
        if let Err(e) = persisted {
            state.rule_sets.remove(&set.version);
            state.links.truncate(links_before);
            return Err(e.into());
        }
        Ok(set)
    }

    /// Read-modify-write a rule set. `Ok(None)` when the version is unknown.
    pub fn update_rule_set<R>(
        &self,
        version: &str,
        f: impl FnOnce(&mut RuleSet) -> R,
    ) -> Result<Option<R>, StorageError> {
        let mut state = self.write();
        let Some(previous) = state.rule_sets.get(version).cloned() else {
            return Ok(None);
        };
        let mut set = previous.clone();
        let out = f(&mut set);
        set.version = previous.version.clone();
        state.rule_sets.insert(version.to_string(), set);

        if let Err(e) = self.persist(&state, Collection::RuleSets) {
            state.rule_sets.insert(version.to_string(), previous);
            return Err(e);
        }
        Ok(Some(out))
    }

    // ── Links ───────────────────────────────────────────────────

    /// Links of one set version, ordered by sid.
    pub fn links_for_version(&self, version: &str) -> Vec<RuleSetLink> {
        let mut links: Vec<RuleSetLink> = self
            .read()
            .links
            .iter()
            .filter(|l| l.set_version == version)
            .cloned()
            .collect();
        links.sort_by_key(|l| l.sid);
        links
    }

    /// Resolve the items linked to `version`, ordered by sid.
    ///
    /// Links pointing at missing items are skipped.
    pub fn rule_items_for_version(&self, version: &str) -> Vec<RuleItem> {
        let links = self.links_for_version(version);
        let state = self.read();
        links
            .iter()
            .filter_map(|l| state.rule_items.get(&l.item_id).cloned())
            .collect()
    }
}
