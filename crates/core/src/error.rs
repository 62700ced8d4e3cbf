use thiserror::Error;

/// Console-side error taxonomy shared by every crate in the workspace.
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl FleetError {
    pub fn sensor_not_found(sensor_id: impl Into<String>) -> Self {
        FleetError::NotFound {
            kind: "sensor",
            id: sensor_id.into(),
        }
    }

    pub fn rule_set_not_found(version: impl Into<String>) -> Self {
        FleetError::NotFound {
            kind: "rule_set",
            id: version.into(),
        }
    }
}

/// Result alias for console operations.
pub type Result<T> = std::result::Result<T, FleetError>;
