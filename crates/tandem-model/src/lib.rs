//! # tandem-model
//!
//! Observable object graph for the Tandem replication engine.
//!
//! This crate provides:
//! - A generational arena of typed nodes and list/set/map containers
//! - Node templates and a registry of type factories
//! - Change notifications for observed objects, with a muted mode
//! - Structural comparison of two graphs
//!
//! ## Example
//!
//! ```rust,ignore
//! use tandem_model::{Graph, NodeTemplate, TypeRegistry};
//!
//! let types = TypeRegistry::new()
//!     .with(NodeTemplate::new("Board").list("notes"))
//!     .with(NodeTemplate::new("Note").value("text", "").value("x", 0.0));
//!
//! let mut graph = Graph::new();
//! let board = graph.create(&types, "Board").unwrap();
//! let note = graph.create(&types, "Note").unwrap();
//! graph.set_property(note, "text", "hello").unwrap();
//! graph.list_push(graph.container(board, "notes").unwrap(), note).unwrap();
//! ```

pub mod change;
pub mod compare;
pub mod error;
pub mod graph;
pub mod object;
pub mod template;
pub mod types;
pub mod value;

pub use change::{Change, ChangeListener};
pub use compare::structurally_equal;
pub use error::{ModelError, Result};
pub use graph::{Graph, SharedGraph};
pub use object::{Node, Object, ObjectKey, ObjectKind, Property, Slot};
pub use template::{NodeTemplate, PropertyTemplate};
pub use types::TypeRegistry;
pub use value::{Scalar, Value};
