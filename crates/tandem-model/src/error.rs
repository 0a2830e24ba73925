//! Error types for the object graph.

use crate::object::{ObjectKey, ObjectKind};
use thiserror::Error;

/// Errors raised by graph reads and mutations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Object {0} no longer exists")]
    StaleKey(ObjectKey),

    #[error("Object {key} is a {found}, expected a {expected}")]
    WrongKind {
        key: ObjectKey,
        expected: ObjectKind,
        found: ObjectKind,
    },

    #[error("Type '{type_tag}' has no property '{property}'")]
    NoSuchProperty { type_tag: String, property: String },

    #[error("Property '{0}' holds a container, not a value")]
    NotAValueProperty(String),

    #[error("Property '{0}' holds a value, not a container")]
    NotAContainer(String),

    #[error("Invalid index: {index} (length: {length})")]
    IndexOutOfBounds { index: usize, length: usize },

    #[error("Type '{0}' has no registered factory")]
    UnknownType(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
