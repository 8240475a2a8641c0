//! Error taxonomy of the tracker. Validation and protocol failures are surfaced to callers as
//! values; storage failures carry enough information for the flush path to keep its buffer.

use thiserror::Error;

/// Failures of the durable key-value substrate.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage quota exceeded ({required} of {quota} bytes). Please clear old data.")]
    QuotaExceeded { required: u64, quota: u64 },
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Stored value could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Invalid rule format: {}", .0.join("; "))]
    InvalidRule(Vec<String>),
    #[error("Rule already exists")]
    DuplicateRule,
    #[error("Storage quota exceeded. Please clear old data.")]
    QuotaExceeded,
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),
    #[error("Invalid payload for {kind}: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Storage(StoreError),
}

impl From<StoreError> for TrackerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::QuotaExceeded { .. } => TrackerError::QuotaExceeded,
            other => TrackerError::Storage(other),
        }
    }
}
