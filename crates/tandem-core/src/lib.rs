//! # tandem-core
//!
//! Replication engine for Tandem object graphs.
//!
//! This crate provides:
//! - The command model describing every creation and mutation
//! - An identity registry binding arena keys to stable object ids
//! - A graph walker producing full snapshots for newly joined peers
//! - A change observer turning local mutations into commands
//! - A command executor with per-target echo suppression
//! - The [`Replicator`] coordinating all of the above under a walk lock
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tandem_core::{Command, Replicator, Topology};
//! use tandem_model::{Graph, NodeTemplate, TypeRegistry};
//!
//! struct Print;
//! impl Topology for Print {
//!     fn send_commands(&self, commands: Vec<Command>) {
//!         for command in commands {
//!             println!("{}", command);
//!         }
//!     }
//! }
//!
//! let types = Arc::new(TypeRegistry::new().with(NodeTemplate::new("Board").value("title", "")));
//! let graph = Graph::new().shared();
//! let root = graph.lock().create(&types, "Board").unwrap();
//!
//! let replicator = Replicator::new(graph.clone(), types, Arc::new(Print));
//! replicator.register_root(root).unwrap();
//!
//! // Prints a SetValue command.
//! graph.lock().set_property(root, "title", "Sprint").unwrap();
//! ```

pub mod command;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod observer;
pub mod registry;
pub mod replicator;
pub mod walker;

pub use command::{Command, CommandId, ObjectId, Operation, Target, WireValue};
pub use dispatch::{Dispatcher, InlineDispatcher, Job};
pub use error::{ReplicationError, Result};
pub use executor::{CommandLog, Executor, Outcome, TargetState};
pub use observer::{Observer, Sweep, DEFAULT_RECLAIM_GRACE};
pub use registry::Registry;
pub use replicator::{Replicator, Topology};
pub use walker::{commands_for_graph, commands_for_new_objects};
