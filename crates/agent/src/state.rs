//! Durable record of the rule versions installed on this sensor.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::AgentError;

pub const VERSIONS_FILE: &str = "VERSIONS.json";

/// Sorted, unique installed versions backed by `RULE_DIR/VERSIONS.json`.
#[derive(Debug, Clone)]
pub struct InstalledVersions {
    path: PathBuf,
    versions: BTreeSet<String>,
}

impl InstalledVersions {
    /// Read the state file. A missing, empty or unreadable file is seeded
    /// with `seed` when one is given.
    pub fn load(rule_dir: &Path, seed: Option<&str>) -> Self {
        let path = rule_dir.join(VERSIONS_FILE);
        let mut versions: BTreeSet<String> = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Vec<String>>(&bytes) {
                Ok(list) => list.into_iter().filter(|v| !v.trim().is_empty()).collect(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable version state, starting empty");
                    BTreeSet::new()
                }
            },
            Err(_) => BTreeSet::new(),
        };

        if versions.is_empty() {
            if let Some(seed) = seed.filter(|s| !s.trim().is_empty()) {
                versions.insert(seed.to_string());
            }
        }
        info!(count = versions.len(), "installed versions loaded");
        Self { path, versions }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.versions.iter().cloned().collect()
    }

    /// Highest installed version.
    pub fn latest(&self) -> Option<&str> {
        self.versions.iter().next_back().map(String::as_str)
    }

    pub fn contains(&self, version: &str) -> bool {
        self.versions.contains(version)
    }

    pub fn insert(&mut self, version: &str) -> bool {
        self.versions.insert(version.to_string())
    }

    pub fn remove(&mut self, version: &str) -> bool {
        self.versions.remove(version)
    }

    /// Write the list atomically (temp file, then rename).
    pub fn persist(&self) -> Result<(), AgentError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(&self.to_vec())?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
