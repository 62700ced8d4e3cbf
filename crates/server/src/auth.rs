//! Shared-key authentication for sensors and console admins.

use std::collections::BTreeMap;

use axum::http::HeaderMap;
use tracing::warn;

use fleet_core::config::AuthConfig;
use fleet_core::FleetError;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const SENSOR_ID_HEADER: &str = "x-sensor-id";
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Per-sensor key table plus the optional admin key.
#[derive(Debug, Clone, Default)]
pub struct KeyRing {
    sensor_keys: BTreeMap<String, String>,
    admin_key: Option<String>,
}

impl KeyRing {
    pub fn new(sensor_keys: BTreeMap<String, String>, admin_key: Option<String>) -> Self {
        Self {
            sensor_keys,
            admin_key,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.sensor_keys.clone(), config.admin_key.clone())
    }

    pub fn sensor_count(&self) -> usize {
        self.sensor_keys.len()
    }

    /// Unknown sensors and wrong keys are both `Unauthorized`.
    pub fn verify_sensor(&self, sensor_id: &str, presented: Option<&str>) -> Result<(), FleetError> {
        match (self.sensor_keys.get(sensor_id), presented) {
            (Some(expected), Some(key)) if keys_match(expected, key) => Ok(()),
            _ => {
                warn!(sensor_id, "sensor credential rejected");
                Err(FleetError::Unauthorized)
            }
        }
    }

    /// Without a configured admin key every admin call is refused.
    pub fn verify_admin(&self, presented: Option<&str>) -> Result<(), FleetError> {
        match (&self.admin_key, presented) {
            (Some(expected), Some(key)) if keys_match(expected, key) => Ok(()),
            _ => {
                warn!("admin credential rejected");
                Err(FleetError::Unauthorized)
            }
        }
    }
}

/// Length-independent comparison of two keys.
fn keys_match(expected: &str, presented: &str) -> bool {
    let (a, b) = (expected.as_bytes(), presented.as_bytes());
    let mut diff = a.len() ^ b.len();
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= usize::from(x ^ y);
    }
    diff == 0
}

pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring() -> KeyRing {
        KeyRing::new(
            BTreeMap::from([("s1".to_string(), "k1".to_string())]),
            Some("admin".to_string()),
        )
    }

    #[test]
    fn sensor_keys_are_per_sensor() {
        let ring = ring();
        assert!(ring.verify_sensor("s1", Some("k1")).is_ok());
        assert!(ring.verify_sensor("s1", Some("k2")).is_err());
        assert!(ring.verify_sensor("s1", Some("k1x")).is_err());
        assert!(ring.verify_sensor("s2", Some("k1")).is_err());
        assert!(ring.verify_sensor("s1", None).is_err());
    }

    #[test]
    fn admin_requires_configured_key() {
        assert!(ring().verify_admin(Some("admin")).is_ok());
        assert!(ring().verify_admin(Some("nope")).is_err());
        assert!(KeyRing::default().verify_admin(Some("")).is_err());
    }
}
