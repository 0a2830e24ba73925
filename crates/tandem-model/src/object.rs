//! Objects stored in the graph arena.
//!
//! An object is either a [`Node`] (a typed record of named properties) or one
//! of the three container kinds. A node property holds either a single
//! [`Value`] or an owned container; containers hold values and never nest.

use crate::value::Value;
use std::fmt;

/// Handle to an object in a [`Graph`](crate::Graph).
///
/// Keys carry the generation of the arena slot they were issued for, so a key
/// to a removed object never resolves to whatever later reuses the slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    index: u32,
    generation: u32,
}

impl ObjectKey {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// The shape of an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Node,
    List,
    Set,
    Map,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::Node => "node",
            ObjectKind::List => "list",
            ObjectKind::Set => "set",
            ObjectKind::Map => "map",
        };
        f.write_str(name)
    }
}

/// What a node property holds.
#[derive(Clone, Debug, PartialEq)]
pub enum Slot {
    /// A scalar or a reference to another node.
    Value(Value),
    /// An owned list, set or map.
    Container(ObjectKey),
}

/// A named property of a node.
#[derive(Clone, Debug, PartialEq)]
pub struct Property {
    pub(crate) name: String,
    pub(crate) slot: Slot,
}

impl Property {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slot(&self) -> &Slot {
        &self.slot
    }
}

/// A typed record whose properties keep their declaration order.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub(crate) type_tag: String,
    pub(crate) properties: Vec<Property>,
}

impl Node {
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// Properties in declaration order.
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub(crate) fn property_mut(&mut self, name: &str) -> Option<&mut Property> {
        self.properties.iter_mut().find(|p| p.name == name)
    }

    /// Value properties in declaration order.
    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.properties.iter().filter_map(|p| match &p.slot {
            Slot::Value(value) => Some((p.name.as_str(), value)),
            Slot::Container(_) => None,
        })
    }

    /// Container properties in declaration order.
    pub fn containers(&self) -> impl Iterator<Item = (&str, ObjectKey)> {
        self.properties.iter().filter_map(|p| match p.slot {
            Slot::Container(key) => Some((p.name.as_str(), key)),
            Slot::Value(_) => None,
        })
    }
}

/// An entry of the graph arena.
#[derive(Clone, Debug, PartialEq)]
pub enum Object {
    Node(Node),
    List(Vec<Value>),
    /// Insertion-ordered, duplicate-free.
    Set(Vec<Value>),
    /// Insertion-ordered, keys are unique.
    Map(Vec<(Value, Value)>),
}

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Node(_) => ObjectKind::Node,
            Object::List(_) => ObjectKind::List,
            Object::Set(_) => ObjectKind::Set,
            Object::Map(_) => ObjectKind::Map,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Object::Node(node) => Some(node),
            _ => None,
        }
    }

    /// Keys of every object this one points at: owned containers and
    /// referenced nodes.
    pub fn children(&self) -> Vec<ObjectKey> {
        match self {
            Object::Node(node) => node
                .properties
                .iter()
                .filter_map(|p| match &p.slot {
                    Slot::Container(key) => Some(*key),
                    Slot::Value(value) => value.as_object(),
                })
                .collect(),
            Object::List(items) | Object::Set(items) => {
                items.iter().filter_map(Value::as_object).collect()
            }
            Object::Map(entries) => entries
                .iter()
                .flat_map(|(k, v)| [k.as_object(), v.as_object()])
                .flatten()
                .collect(),
        }
    }
}
