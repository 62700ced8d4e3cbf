//! HTTP client for the console's sensor endpoints.

use chrono::{DateTime, Utc};
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use fleet_core::SensorMetadata;

use crate::config::AgentConfig;
use crate::error::AgentError;

const API_KEY_HEADER: &str = "X-API-Key";
const SENSOR_ID_HEADER: &str = "X-Sensor-Id";
const RULE_SHA256_HEADER: &str = "x-rule-sha256";

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatPayload {
    pub sensor_id: String,
    #[serde(flatten)]
    pub metadata: SensorMetadata,
    pub enrolled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusPayload {
    pub sensor_id: String,
    pub status: String,
    pub rule_version: Option<String>,
    pub rule_versions: Vec<String>,
}

/// The parts of the console's status response the agent acts on.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusReply {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub missing_rule_versions: Vec<String>,
}

/// A downloaded archive and the digest advertised alongside it.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub sha256: Option<String>,
}

pub struct ConsoleClient {
    http: reqwest::Client,
    base: String,
    sensor_id: String,
    api_key: String,
}

impl ConsoleClient {
    pub fn new(config: &AgentConfig) -> Result<Self, AgentError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            http,
            base: config.api_base.trim_end_matches('/').to_string(),
            sensor_id: config.sensor_id.clone(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub async fn heartbeat(&self, payload: &HeartbeatPayload) -> Result<(), AgentError> {
        let resp = self
            .http
            .put(format!("{}/sensors/heartbeat", self.base))
            .header(API_KEY_HEADER, &self.api_key)
            .json(payload)
            .send()
            .await?;
        accept(resp).await?;
        Ok(())
    }

    pub async fn status(&self, payload: &StatusPayload) -> Result<StatusReply, AgentError> {
        let resp = self
            .http
            .put(format!("{}/sensors/status", self.base))
            .header(API_KEY_HEADER, &self.api_key)
            .json(payload)
            .send()
            .await?;
        let reply = accept(resp).await?.json::<StatusReply>().await?;
        debug!(missing = reply.missing_rule_versions.len(), "status acknowledged");
        Ok(reply)
    }

    pub async fn download(&self, version: &str) -> Result<Artifact, AgentError> {
        let resp = self
            .http
            .get(format!("{}/rules/{}/file", self.base, version))
            .header(API_KEY_HEADER, &self.api_key)
            .header(SENSOR_ID_HEADER, &self.sensor_id)
            .send()
            .await?;
        let resp = accept(resp).await?;
        let sha256 = resp
            .headers()
            .get(RULE_SHA256_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = resp.bytes().await?.to_vec();
        Ok(Artifact { bytes, sha256 })
    }
}

/// Anything but 200 is a rejection carrying the console's body.
async fn accept(resp: Response) -> Result<Response, AgentError> {
    let status = resp.status();
    if status == StatusCode::OK {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(AgentError::Rejected {
        status: status.as_u16(),
        body,
    })
}
