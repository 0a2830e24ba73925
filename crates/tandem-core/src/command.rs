//! The command model: every change a replica can describe to another.
//!
//! Commands name objects by [`ObjectId`] only, never by arena key, and each
//! carries its own [`CommandId`] so an origin can recognise its own commands
//! when the server reflects them back.

use serde::{Deserialize, Serialize};
use std::fmt;
use tandem_model::Scalar;
use ulid::Ulid;

/// Stable identity of a node or container, shared by all replicas.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub Ulid);

impl ObjectId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a single command, used for echo matching.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandId(pub Ulid);

impl CommandId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for CommandId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A value as it travels on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WireValue {
    Scalar(Scalar),
    Object(ObjectId),
}

impl WireValue {
    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            WireValue::Object(id) => Some(*id),
            WireValue::Scalar(_) => None,
        }
    }
}

impl From<Scalar> for WireValue {
    fn from(value: Scalar) -> Self {
        WireValue::Scalar(value)
    }
}

impl From<ObjectId> for WireValue {
    fn from(value: ObjectId) -> Self {
        WireValue::Object(value)
    }
}

/// What a command does.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Designate the graph root.
    SetRoot { root: ObjectId },
    /// Instantiate a node of `type_tag` and bind its containers, in
    /// declaration order, to the given ids.
    CreateObject {
        object: ObjectId,
        type_tag: String,
        containers: Vec<(String, ObjectId)>,
    },
    SetValue {
        target: ObjectId,
        property: String,
        value: WireValue,
    },
    AddToList {
        list: ObjectId,
        index: usize,
        value: WireValue,
    },
    RemoveFromList { list: ObjectId, index: usize },
    AddToSet { set: ObjectId, value: WireValue },
    RemoveFromSet { set: ObjectId, value: WireValue },
    PutToMap {
        map: ObjectId,
        key: WireValue,
        value: WireValue,
    },
    RemoveFromMap { map: ObjectId, key: WireValue },
}

/// The mutable location a command writes to. Each target keeps its own echo
/// log.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    Property { object: ObjectId, property: String },
    Container(ObjectId),
}

impl Target {
    /// The node or container this target belongs to.
    pub fn object(&self) -> ObjectId {
        match self {
            Target::Property { object, .. } => *object,
            Target::Container(id) => *id,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Property { object, property } => write!(f, "{}.{}", object, property),
            Target::Container(id) => write!(f, "{}", id),
        }
    }
}

/// One unit of the wire protocol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub op: Operation,
}

impl Command {
    /// Wrap an operation with a fresh command id.
    pub fn new(op: Operation) -> Self {
        Self {
            id: CommandId::new(),
            op,
        }
    }

    pub fn set_root(root: ObjectId) -> Self {
        Self::new(Operation::SetRoot { root })
    }

    pub fn create_object(
        object: ObjectId,
        type_tag: impl Into<String>,
        containers: Vec<(String, ObjectId)>,
    ) -> Self {
        Self::new(Operation::CreateObject {
            object,
            type_tag: type_tag.into(),
            containers,
        })
    }

    pub fn set_value(target: ObjectId, property: impl Into<String>, value: WireValue) -> Self {
        Self::new(Operation::SetValue {
            target,
            property: property.into(),
            value,
        })
    }

    pub fn add_to_list(list: ObjectId, index: usize, value: WireValue) -> Self {
        Self::new(Operation::AddToList { list, index, value })
    }

    pub fn remove_from_list(list: ObjectId, index: usize) -> Self {
        Self::new(Operation::RemoveFromList { list, index })
    }

    pub fn add_to_set(set: ObjectId, value: WireValue) -> Self {
        Self::new(Operation::AddToSet { set, value })
    }

    pub fn remove_from_set(set: ObjectId, value: WireValue) -> Self {
        Self::new(Operation::RemoveFromSet { set, value })
    }

    pub fn put_to_map(map: ObjectId, key: WireValue, value: WireValue) -> Self {
        Self::new(Operation::PutToMap { map, key, value })
    }

    pub fn remove_from_map(map: ObjectId, key: WireValue) -> Self {
        Self::new(Operation::RemoveFromMap { map, key })
    }

    /// The location this command mutates. Root and creation commands have
    /// none.
    pub fn target(&self) -> Option<Target> {
        match &self.op {
            Operation::SetRoot { .. } | Operation::CreateObject { .. } => None,
            Operation::SetValue {
                target, property, ..
            } => Some(Target::Property {
                object: *target,
                property: property.clone(),
            }),
            Operation::AddToList { list, .. } | Operation::RemoveFromList { list, .. } => {
                Some(Target::Container(*list))
            }
            Operation::AddToSet { set, .. } | Operation::RemoveFromSet { set, .. } => {
                Some(Target::Container(*set))
            }
            Operation::PutToMap { map, .. } | Operation::RemoveFromMap { map, .. } => {
                Some(Target::Container(*map))
            }
        }
    }

    /// Every existing object this command refers to, target first. The ids a
    /// `CreateObject` introduces are not included.
    pub fn referenced_ids(&self) -> Vec<ObjectId> {
        let (owner, values): (Option<ObjectId>, Vec<&WireValue>) = match &self.op {
            Operation::SetRoot { root } => (Some(*root), vec![]),
            Operation::CreateObject { .. } => (None, vec![]),
            Operation::SetValue { target, value, .. } => (Some(*target), vec![value]),
            Operation::AddToList { list, value, .. } => (Some(*list), vec![value]),
            Operation::RemoveFromList { list, .. } => (Some(*list), vec![]),
            Operation::AddToSet { set, value } | Operation::RemoveFromSet { set, value } => {
                (Some(*set), vec![value])
            }
            Operation::PutToMap { map, key, value } => (Some(*map), vec![key, value]),
            Operation::RemoveFromMap { map, key } => (Some(*map), vec![key]),
        };
        owner
            .into_iter()
            .chain(values.into_iter().filter_map(WireValue::as_object))
            .collect()
    }

    /// Short name of the operation, for logs.
    pub fn name(&self) -> &'static str {
        match self.op {
            Operation::SetRoot { .. } => "SetRoot",
            Operation::CreateObject { .. } => "CreateObject",
            Operation::SetValue { .. } => "SetValue",
            Operation::AddToList { .. } => "AddToList",
            Operation::RemoveFromList { .. } => "RemoveFromList",
            Operation::AddToSet { .. } => "AddToSet",
            Operation::RemoveFromSet { .. } => "RemoveFromSet",
            Operation::PutToMap { .. } => "PutToMap",
            Operation::RemoveFromMap { .. } => "RemoveFromMap",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target() {
            Some(target) => write!(f, "{}({}) [{}]", self.name(), target, self.id),
            None => write!(f, "{} [{}]", self.name(), self.id),
        }
    }
}
