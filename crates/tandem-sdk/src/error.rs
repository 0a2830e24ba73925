//! Error types for the Tandem SDK.

use tandem_core::ReplicationError;
use tandem_model::ModelError;
use thiserror::Error;

/// Error type for SDK operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SdkError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Replication error: {0}")]
    Replication(#[from] ReplicationError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Disconnected")]
    Disconnected,
}

impl From<serde_json::Error> for SdkError {
    fn from(error: serde_json::Error) -> Self {
        SdkError::Serialization(error.to_string())
    }
}

/// Result type for SDK operations.
pub type Result<T> = std::result::Result<T, SdkError>;
