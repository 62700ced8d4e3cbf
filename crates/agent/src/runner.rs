//! The agent main loop: report, learn what is missing, fetch and apply it.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use fleet_core::{LivenessStatus, SensorMetadata};

use crate::apply::{apply_archive, validate_version, verify_digest};
use crate::client::{ConsoleClient, HeartbeatPayload, StatusPayload};
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::host::{engine_versions, HostMetrics, NetworkIdentity};
use crate::reload::EngineReloader;
use crate::state::InstalledVersions;

const CPU_SAMPLE_WINDOW: Duration = Duration::from_millis(200);

/// Per-tick convergence result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub installed: Vec<String>,
    pub failed: Vec<String>,
}

pub struct Agent {
    config: AgentConfig,
    client: ConsoleClient,
    versions: InstalledVersions,
    reloader: Box<dyn EngineReloader>,
    identity: NetworkIdentity,
    started_at: DateTime<Utc>,
}

impl Agent {
    /// Load local state and detect the host identity.
    pub fn new(config: AgentConfig, reloader: Box<dyn EngineReloader>) -> Result<Self, AgentError> {
        let client = ConsoleClient::new(&config)?;
        let versions = InstalledVersions::load(&config.rule_dir, config.rule_version.as_deref());
        versions.persist()?;
        let identity = NetworkIdentity::detect(config.mgmt_iface.as_deref(), client.base());
        Ok(Self {
            config,
            client,
            versions,
            reloader,
            identity,
            started_at: Utc::now(),
        })
    }

    pub fn installed_versions(&self) -> Vec<String> {
        self.versions.to_vec()
    }

    async fn heartbeat_payload(&self) -> HeartbeatPayload {
        let metrics = HostMetrics::sample(&self.config.rule_dir, CPU_SAMPLE_WINDOW).await;
        let mut auth = std::collections::BTreeMap::new();
        if let Some(team) = &self.config.owner_team {
            auth.insert("owner_team".to_string(), team.clone());
        }
        HeartbeatPayload {
            sensor_id: self.config.sensor_id.clone(),
            metadata: SensorMetadata {
                hostname: self.config.resolved_hostname(),
                roles: self.config.roles.clone(),
                location: self.config.location.clone(),
                ip_mgmt: Some(self.identity.ip_mgmt.to_string()),
                ifaces: self.identity.ifaces.clone(),
                engine_versions: engine_versions(&self.config.rule_engine, &self.config.engine_bin)
                    .await,
                auth,
                rule_version: self.versions.latest().map(str::to_string),
                cpu_pct: metrics.cpu_pct,
                mem_pct: metrics.mem_pct,
                disk_free_gb: metrics.disk_free_gb,
                status_interval_s: Some(self.config.status_interval),
                ..SensorMetadata::default()
            },
            enrolled_at: self.started_at,
        }
    }

    pub async fn heartbeat(&self) -> Result<(), AgentError> {
        let payload = self.heartbeat_payload().await;
        self.client.heartbeat(&payload).await?;
        info!(sensor_id = %self.config.sensor_id, "heartbeat sent");
        Ok(())
    }

    /// Send a status report and return the versions the console says are missing.
    pub async fn report(&self, status: LivenessStatus) -> Result<Vec<String>, AgentError> {
        let payload = StatusPayload {
            sensor_id: self.config.sensor_id.clone(),
            status: status.as_str().to_string(),
            rule_version: self.versions.latest().map(str::to_string),
            rule_versions: self.versions.to_vec(),
        };
        let reply = self.client.status(&payload).await?;
        info!(status = %status, missing = reply.missing_rule_versions.len(), "status sent");
        Ok(reply.missing_rule_versions)
    }

    /// Install each missing version in turn. Failures stay missing for the
    /// next tick.
    pub async fn sync_missing(&mut self, missing: &[String]) -> SyncSummary {
        let mut summary = SyncSummary::default();
        for version in missing {
            if self.versions.contains(version) {
                continue;
            }
            match self.install(version).await {
                Ok(()) => summary.installed.push(version.clone()),
                Err(e) => {
                    error!(version = %version, error = %e, "rule version not installed");
                    summary.failed.push(version.clone());
                }
            }
        }
        summary
    }

    async fn install(&mut self, version: &str) -> Result<(), AgentError> {
        validate_version(version)?;
        info!(version, "downloading rules");
        let artifact = self.client.download(version).await?;
        verify_digest(version, &artifact.bytes, artifact.sha256.as_deref())?;

        let rule_dir = self.config.rule_dir.clone();
        let owned_version = version.to_string();
        let rules_file: PathBuf = tokio::task::spawn_blocking(move || {
            apply_archive(&rule_dir, &owned_version, &artifact.bytes)
        })
        .await
        .map_err(|e| AgentError::Archive(format!("apply task failed: {}", e)))??;

        if self.config.strict_reload {
            self.reloader.reload(&rules_file).await?;
            self.record(version)?;
        } else {
            self.record(version)?;
            if let Err(e) = self.reloader.reload(&rules_file).await {
                warn!(version, error = %e, "engine reload failed, version kept as installed");
            }
        }
        info!(version, rules = %rules_file.display(), "rule version installed");
        Ok(())
    }

    /// Add to the installed set and persist; the in-memory set is rolled back
    /// when the write fails.
    fn record(&mut self, version: &str) -> Result<(), AgentError> {
        let added = self.versions.insert(version);
        if let Err(e) = self.versions.persist() {
            if added {
                self.versions.remove(version);
            }
            return Err(e);
        }
        Ok(())
    }

    /// One loop iteration: report `active`, then converge.
    pub async fn tick(&mut self) -> SyncSummary {
        match self.report(LivenessStatus::Active).await {
            Ok(missing) if missing.is_empty() => SyncSummary::default(),
            Ok(missing) => {
                info!(?missing, "syncing missing rules");
                self.sync_missing(&missing).await
            }
            Err(e) => {
                warn!(error = %e, "status report failed");
                SyncSummary::default()
            }
        }
    }

    /// Heartbeat once, tick every status interval until `shutdown`
    /// resolves, then report `inactive`.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        if let Err(e) = self.heartbeat().await {
            warn!(error = %e, "heartbeat failed");
        }

        let mut interval = tokio::time::interval(self.config.status_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }

        info!("stopping, marking sensor inactive");
        if let Err(e) = self.report(LivenessStatus::Inactive).await {
            warn!(error = %e, "final inactive report failed");
        }
    }
}
