//! Agent configuration: command-line flags with environment fallbacks.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Sensor agent: liveness reporting and rule-set convergence.
#[derive(Parser, Debug, Clone)]
#[command(name = "sensor-agent", version, about)]
pub struct AgentConfig {
    /// Console API root, e.g. `http://console:8000/api/v1`.
    #[arg(long, env = "API_BASE", default_value = "http://127.0.0.1:8000/api/v1")]
    pub api_base: String,

    /// Per-sensor shared key.
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    pub api_key: String,

    #[arg(long, env = "SENSOR_ID")]
    pub sensor_id: String,

    #[arg(long, env = "SENSOR_HOSTNAME")]
    pub hostname: Option<String>,

    /// Comma-separated roles.
    #[arg(long, env = "SENSOR_ROLES", value_delimiter = ',', default_value = "snort,zeek")]
    pub roles: Vec<String>,

    #[arg(long, env = "SENSOR_LOCATION")]
    pub location: Option<String>,

    #[arg(long, env = "SENSOR_OWNER_TEAM")]
    pub owner_team: Option<String>,

    #[arg(long, env = "RULE_ENGINE", default_value = "snort3")]
    pub rule_engine: String,

    /// Engine binary probed with `-V` for the heartbeat.
    #[arg(long, env = "ENGINE_BIN", default_value = "snort")]
    pub engine_bin: String,

    /// Seed version when no local state exists yet.
    #[arg(long, env = "RULE_VERSION")]
    pub rule_version: Option<String>,

    /// Seconds between status reports.
    #[arg(long, env = "STATUS_INTERVAL", default_value_t = 10)]
    pub status_interval: u64,

    /// Per-request timeout in seconds.
    #[arg(long, env = "SENSOR_TIMEOUT", default_value_t = 5)]
    pub timeout: u64,

    #[arg(long, env = "RULE_DIR", default_value = "/usr/local/etc/rules")]
    pub rule_dir: PathBuf,

    /// Preferred interface for the management address.
    #[arg(long, env = "MGMT_IFACE")]
    pub mgmt_iface: Option<String>,

    /// Command run after a rule file lands; empty disables reloads.
    #[arg(long, env = "RELOAD_COMMAND", default_value = "systemctl reload snort3")]
    pub reload_command: String,

    /// Record a version only after the engine reloaded successfully.
    #[arg(long, env = "STRICT_RELOAD", default_value_t = false)]
    pub strict_reload: bool,
}

impl AgentConfig {
    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.max(1))
    }

    /// `SENSOR_HOSTNAME`, else the kernel hostname, else the sensor id.
    pub fn resolved_hostname(&self) -> String {
        self.hostname
            .clone()
            .or_else(|| {
                std::fs::read_to_string("/proc/sys/kernel/hostname")
                    .ok()
                    .map(|h| h.trim().to_string())
                    .filter(|h| !h.is_empty())
            })
            .unwrap_or_else(|| self.sensor_id.clone())
    }

    pub fn log_summary(&self) {
        tracing::info!(
            sensor_id = %self.sensor_id,
            api_base = %self.api_base,
            rule_dir = %self.rule_dir.display(),
            engine = %self.rule_engine,
            interval_s = self.status_interval,
            strict_reload = self.strict_reload,
            "agent configured"
        );
    }
}
