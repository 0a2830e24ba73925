//! Change notifications emitted by an observed graph.

use crate::graph::Graph;
use crate::object::ObjectKey;
use crate::value::Value;

/// A single mutation of an observed object.
#[derive(Clone, Debug, PartialEq)]
pub enum Change {
    PropertySet {
        node: ObjectKey,
        property: String,
        old: Value,
        new: Value,
    },
    ListInserted {
        list: ObjectKey,
        index: usize,
        value: Value,
    },
    ListRemoved {
        list: ObjectKey,
        index: usize,
        value: Value,
    },
    SetInserted {
        set: ObjectKey,
        value: Value,
    },
    SetRemoved {
        set: ObjectKey,
        value: Value,
    },
    MapPut {
        map: ObjectKey,
        key: Value,
        old: Option<Value>,
        value: Value,
    },
    MapRemoved {
        map: ObjectKey,
        key: Value,
        value: Value,
    },
}

impl Change {
    /// The object that was mutated.
    pub fn object(&self) -> ObjectKey {
        match self {
            Change::PropertySet { node, .. } => *node,
            Change::ListInserted { list, .. } | Change::ListRemoved { list, .. } => *list,
            Change::SetInserted { set, .. } | Change::SetRemoved { set, .. } => *set,
            Change::MapPut { map, .. } | Change::MapRemoved { map, .. } => *map,
        }
    }

    /// True when the change adds or drops a reference to a node.
    pub fn touches_references(&self) -> bool {
        match self {
            Change::PropertySet { old, new, .. } => old.is_object() || new.is_object(),
            Change::ListInserted { value, .. }
            | Change::ListRemoved { value, .. }
            | Change::SetInserted { value, .. }
            | Change::SetRemoved { value, .. } => value.is_object(),
            Change::MapPut {
                key, old, value, ..
            } => {
                key.is_object()
                    || value.is_object()
                    || old.as_ref().is_some_and(Value::is_object)
            }
            Change::MapRemoved { key, value, .. } => key.is_object() || value.is_object(),
        }
    }
}

/// Receives every change made to an observed object while the graph is not
/// muted.
///
/// The listener is called after the mutation has been applied, with the graph
/// still borrowed mutably, so it can read the new state and adjust
/// observation flags.
pub trait ChangeListener: Send + Sync {
    fn on_change(&self, graph: &mut Graph, change: &Change);
}
