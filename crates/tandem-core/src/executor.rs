//! Command executor: applies remote commands and suppresses echoes.
//!
//! Every target (a node property or a container) has a FIFO of command ids
//! this replica generated and sent but has not yet seen come back. A remote
//! command whose id is at the head of its target's FIFO is the server's echo
//! of a change already applied here: it is popped and dropped. Anything else
//! is applied.
//!
//! A command naming an object this replica has already reclaimed is skipped:
//! the object left the graph everywhere and nothing it would change can be
//! seen.

use crate::command::{Command, CommandId, ObjectId, Operation, Target, WireValue};
use crate::error::{ReplicationError, Result};
use crate::observer::Observer;
use crate::registry::Registry;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use tandem_model::{Graph, ObjectKey, ObjectKind, PropertyTemplate, TypeRegistry, Value};
use tracing::trace;

/// Echo state of one target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetState {
    Idle,
    /// This many local commands are still waiting for their echo.
    AwaitingEcho(usize),
}

/// Pending local command ids, per target.
#[derive(Debug, Default)]
pub struct CommandLog {
    pending: Mutex<HashMap<Target, VecDeque<CommandId>>>,
}

impl CommandLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a command that was generated locally and sent.
    pub fn log_local_command(&self, command: &Command) {
        if let Some(target) = command.target() {
            self.pending
                .lock()
                .entry(target)
                .or_default()
                .push_back(command.id);
        }
    }

    /// Pop `command` if it is the next echo its target is waiting for.
    pub fn take_echo(&self, command: &Command) -> bool {
        let Some(target) = command.target() else {
            return false;
        };
        let mut pending = self.pending.lock();
        let Some(queue) = pending.get_mut(&target) else {
            return false;
        };
        if queue.front() != Some(&command.id) {
            return false;
        }
        queue.pop_front();
        if queue.is_empty() {
            pending.remove(&target);
        }
        true
    }

    pub fn state(&self, target: &Target) -> TargetState {
        match self.pending.lock().get(target) {
            Some(queue) if !queue.is_empty() => TargetState::AwaitingEcho(queue.len()),
            _ => TargetState::Idle,
        }
    }

    /// Drop every pending echo on `object`'s targets. Returns how many
    /// targets were cleared.
    pub fn forget(&self, object: ObjectId) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|target, _| target.object() != object);
        before - pending.len()
    }

    /// Total number of commands awaiting an echo.
    pub fn outstanding(&self) -> usize {
        self.pending.lock().values().map(VecDeque::len).sum()
    }
}

/// What happened to a remote command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// The command was this replica's own, reflected back.
    EchoDropped,
    /// Creation of an object that already exists, or the current root again.
    AlreadyKnown,
    RootChanged(ObjectKey),
    /// The command names a reclaimed object and was skipped.
    Detached,
}

impl Outcome {
    /// Whether other replicas need to see the command.
    pub fn is_visible(&self) -> bool {
        !matches!(self, Outcome::Detached)
    }
}

/// Applies remote commands to a graph. The caller mutes the graph and
/// refreshes the observer once the batch is done.
pub struct Executor<'a> {
    pub graph: &'a mut Graph,
    pub registry: &'a mut Registry,
    pub observer: &'a mut Observer,
    pub types: &'a TypeRegistry,
    pub log: &'a CommandLog,
}

impl Executor<'_> {
    pub fn execute_remote_command(&mut self, command: &Command) -> Result<Outcome> {
        if self.log.take_echo(command) {
            trace!(%command, "echo dropped");
            return Ok(Outcome::EchoDropped);
        }
        if command
            .referenced_ids()
            .into_iter()
            .any(|id| self.registry.is_retired(id))
        {
            trace!(%command, "names a reclaimed object, skipped");
            return Ok(Outcome::Detached);
        }
        trace!(%command, "applying");

        match &command.op {
            Operation::SetRoot { root } => {
                let key = self.resolve(*root, ObjectKind::Node)?;
                if self.observer.root() == Some(key) {
                    return Ok(Outcome::AlreadyKnown);
                }
                self.observer.set_root(key);
                Ok(Outcome::RootChanged(key))
            }
            Operation::CreateObject {
                object,
                type_tag,
                containers,
            } => self.create(*object, type_tag, containers),
            Operation::SetValue {
                target,
                property,
                value,
            } => {
                let key = self.resolve(*target, ObjectKind::Node)?;
                let value = self.value(value)?;
                self.graph.set_property(key, property, value)?;
                Ok(Outcome::Applied)
            }
            Operation::AddToList { list, index, value } => {
                let key = self.resolve(*list, ObjectKind::List)?;
                let value = self.value(value)?;
                self.graph.list_insert(key, *index, value)?;
                Ok(Outcome::Applied)
            }
            Operation::RemoveFromList { list, index } => {
                let key = self.resolve(*list, ObjectKind::List)?;
                self.graph.list_remove(key, *index)?;
                Ok(Outcome::Applied)
            }
            Operation::AddToSet { set, value } => {
                let key = self.resolve(*set, ObjectKind::Set)?;
                let value = self.value(value)?;
                self.graph.set_insert(key, value)?;
                Ok(Outcome::Applied)
            }
            Operation::RemoveFromSet { set, value } => {
                let key = self.resolve(*set, ObjectKind::Set)?;
                let value = self.value(value)?;
                self.graph.set_remove(key, &value)?;
                Ok(Outcome::Applied)
            }
            Operation::PutToMap { map, key, value } => {
                let map = self.resolve(*map, ObjectKind::Map)?;
                let key = self.value(key)?;
                let value = self.value(value)?;
                self.graph.map_insert(map, key, value)?;
                Ok(Outcome::Applied)
            }
            Operation::RemoveFromMap { map, key } => {
                let map = self.resolve(*map, ObjectKind::Map)?;
                let key = self.value(key)?;
                self.graph.map_remove(map, &key)?;
                Ok(Outcome::Applied)
            }
        }
    }

    fn create(
        &mut self,
        object: ObjectId,
        type_tag: &str,
        containers: &[(String, ObjectId)],
    ) -> Result<Outcome> {
        if self.registry.object_for(self.graph, object).is_some() {
            return Ok(Outcome::AlreadyKnown);
        }
        if self.registry.is_retired(object) {
            return Ok(Outcome::Detached);
        }
        let template = self
            .types
            .create(type_tag)
            .ok_or_else(|| ReplicationError::UnknownType(type_tag.to_string()))?;

        let declared: Vec<&str> = template
            .properties()
            .iter()
            .filter(|(_, property)| !matches!(property, PropertyTemplate::Value(_)))
            .map(|(name, _)| name.as_str())
            .collect();
        let named: Vec<&str> = containers.iter().map(|(name, _)| name.as_str()).collect();
        if declared != named {
            return Err(ReplicationError::Malformed(format!(
                "{} declares containers {:?}, command names {:?}",
                type_tag, declared, named
            )));
        }
        let mut seen = HashSet::from([object]);
        if let Some((_, id)) = containers.iter().find(|(_, id)| !seen.insert(*id)) {
            return Err(ReplicationError::Malformed(format!(
                "container id {} is named twice",
                id
            )));
        }
        if let Some((_, id)) = containers
            .iter()
            .find(|(_, id)| self.registry.object_for(self.graph, *id).is_some())
        {
            return Err(ReplicationError::Malformed(format!(
                "container id {} is already in use",
                id
            )));
        }

        let key = self.graph.insert_node(template);
        self.registry.register(self.graph, key, object);
        for (name, id) in containers {
            let container = self.graph.container(key, name)?;
            self.registry.register(self.graph, container, *id);
        }
        Ok(Outcome::Applied)
    }

    fn resolve(&self, id: ObjectId, expected: ObjectKind) -> Result<ObjectKey> {
        let key = self
            .registry
            .object_for(self.graph, id)
            .ok_or(ReplicationError::UnknownObject(id))?;
        let found = self.graph.kind(key)?;
        if found != expected {
            return Err(ReplicationError::WrongKind {
                id,
                expected,
                found,
            });
        }
        Ok(key)
    }

    fn value(&self, value: &WireValue) -> Result<Value> {
        match value {
            WireValue::Scalar(scalar) => Ok(Value::Scalar(scalar.clone())),
            WireValue::Object(id) => self.resolve(*id, ObjectKind::Node).map(Value::Object),
        }
    }
}
