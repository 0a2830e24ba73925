//! Error types for the replication engine.

use crate::command::ObjectId;
use tandem_model::{ModelError, ObjectKind};
use thiserror::Error;

/// Errors raised while applying or generating commands.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReplicationError {
    #[error("No object is registered under id {0}")]
    UnknownObject(ObjectId),

    #[error("Object {id} is a {found}, expected a {expected}")]
    WrongKind {
        id: ObjectId,
        expected: ObjectKind,
        found: ObjectKind,
    },

    #[error("Type '{0}' cannot be constructed")]
    UnknownType(String),

    #[error("Malformed command: {0}")]
    Malformed(String),

    #[error("No root has been registered")]
    RootNotSet,

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Dispatcher dropped the batch before running it")]
    DispatchAborted,
}

impl ReplicationError {
    /// True for errors caused by what a peer sent. The connection that
    /// delivered the command can no longer be trusted.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            ReplicationError::UnknownObject(_)
                | ReplicationError::WrongKind { .. }
                | ReplicationError::UnknownType(_)
                | ReplicationError::Malformed(_)
                | ReplicationError::Model(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ReplicationError>;
