//! Graph walker: turns a live graph into the commands that rebuild it.
//!
//! The walk is depth-first. For each node it emits the node's
//! `CreateObject`, then one `SetValue` per value property in declaration
//! order (creating referenced nodes first), then the contents of its
//! containers. A node met a second time in the same walk is referenced by id,
//! so aliasing and cycles terminate.

use crate::command::{Command, ObjectId, WireValue};
use crate::error::{ReplicationError, Result};
use crate::registry::Registry;
use std::collections::HashSet;
use tandem_model::{Graph, ModelError, Object, ObjectKey, Value};
use tracing::trace;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    /// Emit everything reachable.
    Snapshot,
    /// Stop at nodes that already have an id; peers know them.
    Incremental,
}

struct Walker<'a> {
    graph: &'a Graph,
    registry: &'a mut Registry,
    mode: Mode,
    visited: HashSet<ObjectKey>,
    commands: &'a mut Vec<Command>,
}

/// Commands that rebuild the graph under `root` on an empty replica, ending
/// with `SetRoot`. Every visited object is registered.
pub fn commands_for_graph(
    graph: &Graph,
    registry: &mut Registry,
    root: ObjectKey,
) -> Result<Vec<Command>> {
    let mut commands = Vec::new();
    let root_id = Walker {
        graph,
        registry,
        mode: Mode::Snapshot,
        visited: HashSet::new(),
        commands: &mut commands,
    }
    .node(root)?;
    commands.push(Command::set_root(root_id));
    Ok(commands)
}

/// Append the commands creating `key` and whatever it reaches that has no id
/// yet. Returns the id of `key`.
pub fn commands_for_new_objects(
    graph: &Graph,
    registry: &mut Registry,
    key: ObjectKey,
    commands: &mut Vec<Command>,
) -> Result<ObjectId> {
    Walker {
        graph,
        registry,
        mode: Mode::Incremental,
        visited: HashSet::new(),
        commands,
    }
    .node(key)
}

impl Walker<'_> {
    fn node(&mut self, key: ObjectKey) -> Result<ObjectId> {
        if self.mode == Mode::Incremental {
            if let Some(id) = self.registry.id_of(key) {
                return Ok(id);
            }
        }
        if !self.visited.insert(key) {
            return Ok(self.registry.id_for(key));
        }

        let graph = self.graph;
        let node = graph.node(key)?;
        let id = self.registry.id_for(key);
        let containers: Vec<(String, ObjectId)> = node
            .containers()
            .map(|(name, container)| (name.to_string(), self.registry.id_for(container)))
            .collect();
        trace!(object = %id, type_tag = node.type_tag(), "walk: create");
        self.commands.push(Command::create_object(
            id,
            node.type_tag(),
            containers.clone(),
        ));

        for (name, value) in node.values() {
            let value = self.value(value)?;
            self.commands.push(Command::set_value(id, name, value));
        }

        for ((_, container_id), (_, container)) in containers.iter().zip(node.containers()) {
            self.container(*container_id, container)?;
        }
        Ok(id)
    }

    fn container(&mut self, id: ObjectId, key: ObjectKey) -> Result<()> {
        let graph = self.graph;
        match graph.get(key) {
            Some(Object::List(items)) => {
                for (index, item) in items.iter().enumerate() {
                    let value = self.value(item)?;
                    self.commands.push(Command::add_to_list(id, index, value));
                }
            }
            Some(Object::Set(items)) => {
                for item in items {
                    let value = self.value(item)?;
                    self.commands.push(Command::add_to_set(id, value));
                }
            }
            Some(Object::Map(entries)) => {
                for (key, value) in entries {
                    let key = self.value(key)?;
                    let value = self.value(value)?;
                    self.commands.push(Command::put_to_map(id, key, value));
                }
            }
            Some(Object::Node(_)) => {
                return Err(ReplicationError::Malformed(format!(
                    "container {} resolves to a node",
                    id
                )))
            }
            None => return Err(ModelError::StaleKey(key).into()),
        }
        Ok(())
    }

    fn value(&mut self, value: &Value) -> Result<WireValue> {
        match value {
            Value::Scalar(scalar) => Ok(WireValue::Scalar(scalar.clone())),
            Value::Object(key) => self.node(*key).map(WireValue::Object),
        }
    }
}
