use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::liveness::LivenessThresholds;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub liveness: LivenessConfig,
    pub rules: RulesConfig,
    pub auth: AuthConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `FLEET_PROFILE`. When set (e.g. `PROD`), every key
    /// is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("FLEET_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        let storage = StorageConfig::from_env_profiled(p);
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            liveness: LivenessConfig::from_env_profiled(p),
            rules: RulesConfig::from_env_profiled(p, &storage),
            auth: AuthConfig::from_env_profiled(p),
            storage,
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:    {}:{}", self.server.host, self.server.port);
        tracing::info!("  storage:   data_dir={}", self.storage.data_dir.display());
        tracing::info!(
            "  liveness:  dormant_after={}s, inactive_after={}s",
            self.liveness.dormant_after_secs,
            self.liveness.inactive_after_secs
        );
        tracing::info!(
            "  rules:     engine={}, base_dir={}, sid_start={}",
            self.rules.engine,
            self.rules.base_dir.display(),
            self.rules.sid_start
        );
        tracing::info!(
            "  auth:      sensor_keys={}, admin_key={}",
            self.auth.sensor_keys.len(),
            if self.auth.admin_key.is_some() { "configured" } else { "(none)" }
        );
    }

    /// Return a redacted view safe for API responses (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "server": { "host": self.server.host, "port": self.server.port },
            "storage": { "data_dir": self.storage.data_dir },
            "liveness": {
                "dormant_after_secs": self.liveness.dormant_after_secs,
                "inactive_after_secs": self.liveness.inactive_after_secs,
            },
            "rules": {
                "engine": self.rules.engine,
                "base_dir": self.rules.base_dir,
            },
            "auth": {
                "sensor_count": self.auth.sensor_keys.len(),
                "admin_configured": self.auth.admin_key.is_some(),
            },
        })
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "HOST", "0.0.0.0"),
            port: profiled_env_u16(p, "PORT", 8000),
            cors_origin: profiled_env_or(p, "CORS_ORIGIN", "*"),
        }
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            data_dir: PathBuf::from(profiled_env_or(p, "DATA_DIR", "data")),
        }
    }
}

// ── Liveness ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    pub dormant_after_secs: u64,
    pub inactive_after_secs: u64,
}

impl LivenessConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            dormant_after_secs: profiled_env_u64(p, "STATUS_INTERVAL", 60),
            inactive_after_secs: profiled_env_u64(p, "INACTIVE_INTERVAL", 180),
        }
    }

    pub fn thresholds(&self) -> LivenessThresholds {
        LivenessThresholds::from_secs(self.dormant_after_secs, self.inactive_after_secs)
    }
}

// ── Rules ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Directory that receives built rule archives.
    pub base_dir: PathBuf,
    pub engine: String,
    pub home_net: String,
    pub external_net: String,
    /// First signature id handed out on an empty catalogue.
    pub sid_start: u64,
}

impl RulesConfig {
    fn from_env_profiled(p: &str, storage: &StorageConfig) -> Self {
        let base_dir = profiled_env_opt(p, "RULE_BASE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| storage.data_dir.join("rules"));
        Self {
            base_dir,
            engine: profiled_env_or(p, "RULE_ENGINE", "snort3"),
            home_net: profiled_env_or(p, "HOME_NET", "$HOME_NET"),
            external_net: profiled_env_or(p, "EXTERNAL_NET", "$EXTERNAL_NET"),
            sid_start: profiled_env_u64(p, "SID_START", 3_000_000),
        }
    }
}

// ── Auth ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// sensor_id -> shared key.
    #[serde(skip_serializing)]
    pub sensor_keys: BTreeMap<String, String>,
    #[serde(skip_serializing)]
    pub admin_key: Option<String>,
}

impl AuthConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            sensor_keys: profiled_env_opt(p, "API_KEYS")
                .map(|raw| parse_key_table(&raw))
                .unwrap_or_default(),
            admin_key: profiled_env_opt(p, "CONSOLE_ADMIN_KEY"),
        }
    }
}

/// Parse `"sensor-1=key1, sensor-2=key2"` into a key table.
///
/// Entries without `=` or with an empty side are dropped.
pub fn parse_key_table(raw: &str) -> BTreeMap<String, String> {
    raw.split(',')
        .filter_map(|item| {
            let (id, key) = item.trim().split_once('=')?;
            let (id, key) = (id.trim(), key.trim());
            (!id.is_empty() && !key.is_empty()).then(|| (id.to_string(), key.to_string()))
        })
        .collect()
}
