//! Tandem SDK - server and client endpoints for replicated object graphs
//!
//! The SDK wires the replication engine of [`tandem_core`] into a star
//! topology: one [`Server`] holds the authoritative graph, any number of
//! [`Client`]s hold replicas. Links are in-memory channels carrying
//! serialized command batches.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tandem_model::{Graph, NodeTemplate, TypeRegistry};
//! use tandem_sdk::prelude::*;
//!
//! # async fn run() -> tandem_sdk::Result<()> {
//! let types = Arc::new(
//!     TypeRegistry::new().with(NodeTemplate::new("Board").value("title", "").list("notes")),
//! );
//! let graph = Graph::new().shared();
//! let root = graph.lock().create(&types, "Board")?;
//!
//! let server = Server::new(graph, root, types.clone(), ServerConfig::default())?;
//! let connection = server.accept(PeerId::new("alice")).await?;
//! let client = Client::connect(connection, types, ClientConfig::default());
//!
//! let board = client.wait_for_model().await?;
//! client.graph().lock().set_property(board, "title", "Sprint 12")?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`server`] - Accepts peers, seeds them with snapshots, rebroadcasts batches
//! - [`client`] - Builds a replica from the server's snapshot and stays in sync
//! - [`network`] - Peer routing, framing and connections
//! - [`serializer`] - Byte encoding of command batches
//! - [`dispatch`] - Applying remote batches on a dedicated thread
//! - [`error`] - Error types

pub mod client;
pub mod dispatch;
pub mod error;
pub mod network;
pub mod serializer;
pub mod server;

// Re-exports for convenience
pub use client::{Client, ClientConfig, ClientConfigBuilder, ClientEvent};
pub use dispatch::ThreadDispatcher;
pub use error::{Result, SdkError};
pub use network::{encode_frames, Connection, Frame, PeerId, PeerRouter, Transport};
pub use serializer::{JsonSerializer, Serializer};
pub use server::{Server, ServerConfig, ServerConfigBuilder, ServerEvent};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::client::{Client, ClientConfig, ClientEvent};
    pub use crate::error::SdkError;
    pub use crate::network::PeerId;
    pub use crate::server::{Server, ServerConfig, ServerEvent};
    pub use tandem_core::{Command, Replicator};
    pub use tandem_model::{Graph, ObjectKey, Scalar, SharedGraph, TypeRegistry, Value};
}
