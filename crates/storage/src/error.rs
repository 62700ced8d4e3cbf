use thiserror::Error;

use fleet_core::FleetError;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt collection '{collection}': {reason}")]
    Corrupt {
        collection: &'static str,
        reason: String,
    },
}

impl From<StorageError> for FleetError {
    fn from(e: StorageError) -> Self {
        FleetError::Storage(e.to_string())
    }
}
