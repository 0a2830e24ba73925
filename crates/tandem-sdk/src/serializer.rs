//! Byte-level encoding of command batches.

use crate::error::Result;
use tandem_core::Command;

/// Turns command batches into bytes and back.
///
/// Implementations are shared between connection tasks, and a failed call
/// must leave the serializer usable for the next one.
pub trait Serializer: Send + Sync {
    fn serialize(&self, commands: &[Command]) -> Result<Vec<u8>>;
    fn deserialize(&self, bytes: &[u8]) -> Result<Vec<Command>>;
}

/// JSON encoding via `serde_json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, commands: &[Command]) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(commands)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Vec<Command>> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
