//! [`FleetStore`]: collection state, loading and atomic persistence.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use fleet_core::{RuleItem, RuleSet, RuleSetLink, Sensor};

use crate::error::StorageError;

/// Named collections, each persisted to its own file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Collection {
    Sensors,
    RuleItems,
    RuleSets,
    RuleSetItems,
    Counters,
}

impl Collection {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Sensors => "sensors",
            Self::RuleItems => "rule_items",
            Self::RuleSets => "rule_sets",
            Self::RuleSetItems => "rule_set_items",
            Self::Counters => "counters",
        }
    }

    fn filename(self) -> String {
        format!("{}.json", self.name())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Counters {
    /// Last sid handed out (`None` until the first allocation).
    #[serde(default)]
    pub sid: Option<u64>,
}

/// In-memory image of every collection.
#[derive(Debug, Default)]
pub(crate) struct Collections {
    pub sensors: BTreeMap<String, Sensor>,
    pub rule_items: BTreeMap<Uuid, RuleItem>,
    /// rule_hash -> item id
    pub items_by_hash: HashMap<String, Uuid>,
    pub rule_sets: BTreeMap<String, RuleSet>,
    pub links: Vec<RuleSetLink>,
    pub counters: Counters,
}

impl Collections {
    fn value_of(&self, collection: Collection) -> Result<serde_json::Value, StorageError> {
        let value = match collection {
            Collection::Sensors => serde_json::to_value(self.sensors.values().collect::<Vec<_>>())?,
            Collection::RuleItems => {
                serde_json::to_value(self.rule_items.values().collect::<Vec<_>>())?
            }
            Collection::RuleSets => {
                serde_json::to_value(self.rule_sets.values().collect::<Vec<_>>())?
            }
            Collection::RuleSetItems => serde_json::to_value(&self.links)?,
            Collection::Counters => serde_json::to_value(&self.counters)?,
        };
        Ok(value)
    }
}

/// Filesystem-backed document store shared by every console component.
///
/// Readers take a shared lock; each mutating method holds the write lock for
/// its whole read-modify-write, which makes single-document updates atomic.
pub struct FleetStore {
    data_dir: Option<PathBuf>,
    state: RwLock<Collections>,
}

impl FleetStore {
    /// Open (or create) a store rooted at `data_dir`.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;

        let sensors: Vec<Sensor> = load_collection(&data_dir, Collection::Sensors)?;
        let rule_items: Vec<RuleItem> = load_collection(&data_dir, Collection::RuleItems)?;
        let rule_sets: Vec<RuleSet> = load_collection(&data_dir, Collection::RuleSets)?;
        let links: Vec<RuleSetLink> = load_collection(&data_dir, Collection::RuleSetItems)?;
        let counters: Counters = load_collection(&data_dir, Collection::Counters)?;

        let mut state = Collections {
            links,
            counters,
            ..Default::default()
        };
        for sensor in sensors {
            state.sensors.insert(sensor.sensor_id.clone(), sensor);
        }
        for item in rule_items {
            if let Some(existing) = state.items_by_hash.insert(item.rule_hash.clone(), item.id) {
                return Err(StorageError::Corrupt {
                    collection: Collection::RuleItems.name(),
                    reason: format!("items {} and {} share hash {}", existing, item.id, item.rule_hash),
                });
            }
            state.rule_items.insert(item.id, item);
        }
        for set in rule_sets {
            state.rule_sets.insert(set.version.clone(), set);
        }

        info!(
            data_dir = %data_dir.display(),
            sensors = state.sensors.len(),
            rule_items = state.rule_items.len(),
            rule_sets = state.rule_sets.len(),
            "fleet store opened"
        );

        Ok(Self {
            data_dir: Some(data_dir),
            state: RwLock::new(state),
        })
    }

    /// Store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            data_dir: None,
            state: RwLock::new(Collections::default()),
        }
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Collections> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Collections> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write one collection to disk. Caller holds the write lock.
    pub(crate) fn persist(
        &self,
        state: &Collections,
        collection: Collection,
    ) -> Result<(), StorageError> {
        let Some(dir) = &self.data_dir else {
            return Ok(());
        };
        let value = state.value_of(collection)?;
        write_json_atomic(&dir.join(collection.filename()), &value)?;
        debug!(collection = collection.name(), "collection persisted");
        Ok(())
    }
}

fn load_collection<T>(dir: &Path, collection: Collection) -> Result<T, StorageError>
where
    T: DeserializeOwned + Default,
{
    let path = dir.join(collection.filename());
    if !path.exists() {
        return Ok(T::default());
    }
    let json = std::fs::read_to_string(&path)?;
    serde_json::from_str(&json).map_err(|e| StorageError::Corrupt {
        collection: collection.name(),
        reason: e.to_string(),
    })
}

/// Write JSON to a sibling temp file, then rename over the target.
pub(crate) fn write_json_atomic(path: &Path, value: &serde_json::Value) -> Result<(), StorageError> {
    let json = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
