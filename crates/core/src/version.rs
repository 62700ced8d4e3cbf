//! Rule-set version strings: `YYYY.MM.DD-HHMMSS-e<event-id>[-NN]`.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::FleetError;

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}\.\d{2}\.\d{2}-\d{6}-e\d+(?:-\d{2})?$").expect("static version regex")
});

/// Highest `-NN` disambiguator a single second/event pair can receive.
const MAX_DISAMBIGUATOR: u32 = 99;

/// A validated rule-set version.
///
/// Versions sort lexicographically, which for a fixed event id is also
/// creation-time order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleSetVersion(String);

impl RuleSetVersion {
    /// Validate a raw version string.
    pub fn parse(raw: &str) -> Result<Self, FleetError> {
        if VERSION_RE.is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(FleetError::PreconditionFailed(format!(
                "invalid rule set version '{}'",
                raw
            )))
        }
    }

    pub fn is_valid(raw: &str) -> bool {
        VERSION_RE.is_match(raw)
    }

    /// Generate a fresh version for `event_id` at `now`.
    ///
    /// `exists` reports whether a candidate is already taken; collisions get
    /// `-01`, `-02`, ... appended to the base.
    pub fn generate(
        now: DateTime<Utc>,
        event_id: u64,
        exists: impl Fn(&str) -> bool,
    ) -> Result<Self, FleetError> {
        let base = format!("{}-e{}", now.format("%Y.%m.%d-%H%M%S"), event_id);
        if !exists(&base) {
            return Ok(Self(base));
        }
        for n in 1..=MAX_DISAMBIGUATOR {
            let candidate = format!("{}-{:02}", base, n);
            if !exists(&candidate) {
                return Ok(Self(candidate));
            }
        }
        Err(FleetError::PreconditionFailed(format!(
            "no free version left for base '{}'",
            base
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RuleSetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RuleSetVersion {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for RuleSetVersion {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for RuleSetVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RuleSetVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;

    #[test]
    fn accepts_well_formed_versions() {
        for v in [
            "2025.01.01-000000-e1",
            "2025.11.15-112233-e42",
            "2025.11.15-112233-e42-07",
        ] {
            assert!(RuleSetVersion::parse(v).is_ok(), "{v} should be valid");
        }
    }

    #[test]
    fn rejects_malformed_versions() {
        for v in [
            "",
            "2025.1.1-000000-e1",
            "2025.01.01-0000-e1",
            "2025.01.01-000000-1",
            "2025.01.01-000000-e1-7",
            "2025.01.01-000000-e1-007",
            "../2025.01.01-000000-e1",
            "2025.01.01-000000-e1.tgz",
        ] {
            let err = RuleSetVersion::parse(v).unwrap_err();
            assert!(matches!(err, FleetError::PreconditionFailed(_)), "{v}");
        }
    }

    #[test]
    fn generate_disambiguates_collisions() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 8, 30, 15).unwrap();
        let mut taken = HashSet::new();

        let first = RuleSetVersion::generate(now, 7, |v| taken.contains(v)).unwrap();
        assert_eq!(first.as_str(), "2025.01.01-083015-e7");
        taken.insert(first.to_string());

        let second = RuleSetVersion::generate(now, 7, |v| taken.contains(v)).unwrap();
        assert_eq!(second.as_str(), "2025.01.01-083015-e7-01");
        taken.insert(second.to_string());

        let third = RuleSetVersion::generate(now, 7, |v| taken.contains(v)).unwrap();
        assert_eq!(third.as_str(), "2025.01.01-083015-e7-02");
        assert!(first < second && second < third);
    }

    #[test]
    fn generate_gives_up_after_ninety_nine() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert!(RuleSetVersion::generate(now, 1, |_| true).is_err());
    }

    #[test]
    fn serde_rejects_bad_versions() {
        let ok: RuleSetVersion = serde_json::from_str("\"2025.01.01-000000-e1\"").unwrap();
        assert_eq!(ok.as_str(), "2025.01.01-000000-e1");
        assert!(serde_json::from_str::<RuleSetVersion>("\"v1\"").is_err());
    }
}
