//! Sensor liveness states and the deterministic status function.
//!
//! A sensor's stored `status` is a cache of [`LivenessThresholds::evaluate`]
//! applied to its `last_status_at`. Reports promote a sensor eagerly; timers
//! and on-demand checks only ever demote it.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Liveness state of a sensor, ordered from healthiest to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LivenessStatus {
    Active,
    Dormant,
    Inactive,
}

impl LivenessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Dormant => "dormant",
            Self::Inactive => "inactive",
        }
    }
}

impl fmt::Display for LivenessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LivenessStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "dormant" => Ok(Self::Dormant),
            "inactive" => Ok(Self::Inactive),
            other => Err(format!("unknown liveness status '{}'", other)),
        }
    }
}

/// Why a sensor carries its current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusReason {
    /// Seeded by the first heartbeat; no status report yet.
    NeverSeen,
    /// Sensor reported itself active.
    Ok,
    /// Sensor explicitly reported dormant.
    ManualDormant,
    /// Sensor explicitly reported inactive (usually on shutdown).
    ManualInactive,
}

impl StatusReason {
    /// Reason recorded for a self-reported status.
    pub fn for_report(status: LivenessStatus) -> Self {
        match status {
            LivenessStatus::Active => Self::Ok,
            LivenessStatus::Dormant => Self::ManualDormant,
            LivenessStatus::Inactive => Self::ManualInactive,
        }
    }
}

/// Demotion thresholds, both measured from `last_status_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessThresholds {
    pub dormant_after: Duration,
    pub inactive_after: Duration,
}

impl Default for LivenessThresholds {
    fn default() -> Self {
        Self {
            dormant_after: Duration::from_secs(60),
            inactive_after: Duration::from_secs(180),
        }
    }
}

impl LivenessThresholds {
    pub fn from_secs(dormant_after: u64, inactive_after: u64) -> Self {
        Self {
            dormant_after: Duration::from_secs(dormant_after),
            inactive_after: Duration::from_secs(inactive_after.max(dormant_after)),
        }
    }

    /// The status function `f(last_status_at, now)`.
    ///
    /// Missing timestamps evaluate to `Inactive`. A timestamp in the future
    /// (clock skew) counts as zero elapsed.
    pub fn evaluate(&self, last_status_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> LivenessStatus {
        let Some(last) = last_status_at else {
            return LivenessStatus::Inactive;
        };
        let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
        if elapsed <= self.dormant_after {
            LivenessStatus::Active
        } else if elapsed <= self.inactive_after {
            LivenessStatus::Dormant
        } else {
            LivenessStatus::Inactive
        }
    }

    /// Like [`evaluate`](Self::evaluate), but never better than what the
    /// sensor last reported about itself.
    pub fn effective(
        &self,
        last_status_at: Option<DateTime<Utc>>,
        reported: Option<LivenessStatus>,
        now: DateTime<Utc>,
    ) -> LivenessStatus {
        let computed = self.evaluate(last_status_at, now);
        match reported {
            Some(r) => computed.max(r),
            None => computed,
        }
    }
}

/// Parse a stored RFC 3339 timestamp; unparsable input is treated as absent.
pub fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s.replace('Z', "+00:00")).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Serde adapter: reads an optional timestamp, mapping unparsable values to `None`.
pub fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(parse_timestamp(raw.as_deref()))
}
