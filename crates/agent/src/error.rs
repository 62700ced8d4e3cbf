use thiserror::Error;

/// Failures on the sensor side. None of them stop the main loop.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("network error: {0}")]
    TransientNetwork(#[from] reqwest::Error),

    #[error("console rejected request: {status} {body}")]
    Rejected { status: u16, body: String },

    #[error("integrity check failed for {version}: expected {expected}, got {actual}")]
    Integrity {
        version: String,
        expected: String,
        actual: String,
    },

    #[error("invalid rule version '{0}'")]
    InvalidVersion(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("engine reload failed: {0}")]
    Reload(String),
}

impl From<zip::result::ZipError> for AgentError {
    fn from(e: zip::result::ZipError) -> Self {
        AgentError::Archive(e.to_string())
    }
}
