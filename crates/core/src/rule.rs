//! Rule items, rule sets and the links between them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a rule item came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleProvenance {
    #[serde(default)]
    pub event_id: Option<u64>,
    #[serde(default)]
    pub attr_id: Option<String>,
    #[serde(default)]
    pub indicator_type: Option<String>,
    #[serde(default)]
    pub pulled_at: Option<String>,
}

/// One normalized detection rule. Append-only once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleItem {
    pub id: Uuid,
    pub gid: u32,
    pub sid: u64,
    pub rev: u32,
    pub msg: String,
    pub rule_text: String,
    pub rule_hash: String,
    pub protocol: String,
    pub src_sel: String,
    pub dst_sel: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub metadata: RuleProvenance,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of a rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSetStatus {
    Draft,
    Built,
    Ready,
    Deployed,
    Disabled,
}

impl RuleSetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Built => "built",
            Self::Ready => "ready",
            Self::Deployed => "deployed",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for RuleSetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A materialized archive and its integrity digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFile {
    pub path: String,
    pub sha256: String,
    #[serde(default)]
    pub size_bytes: u64,
}

/// Files produced by a build. `tar` is the packaged rule archive slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSetFiles {
    #[serde(default)]
    pub tar: Option<ArtifactFile>,
}

/// An immutable, versioned bundle of rule items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub id: Uuid,
    pub name: String,
    pub version: String,
    pub event_id: u64,
    #[serde(default)]
    pub event_uuid: String,
    pub engine: String,
    pub item_count: usize,
    pub status: RuleSetStatus,
    #[serde(default)]
    pub active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub build_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deployed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub files: RuleSetFiles,
    #[serde(default)]
    pub notes: Option<String>,
}

impl RuleSet {
    /// The built archive, if one has been published.
    pub fn archive(&self) -> Option<&ArtifactFile> {
        self.files.tar.as_ref()
    }

    /// Suggested download filename: `<engine>_<version>.zip`.
    pub fn archive_filename(&self) -> String {
        format!("{}_{}.zip", self.engine, self.version)
    }
}

/// Membership of a rule item in a rule set, with the denormalized
/// `(set_version, sid)` pair for version-scoped lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSetLink {
    pub set_id: Uuid,
    pub item_id: Uuid,
    pub set_version: String,
    pub gid: u32,
    pub sid: u64,
    pub rev: u32,
}
