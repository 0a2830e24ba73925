//! Generational arena holding nodes and containers.
//!
//! Objects reference each other by [`ObjectKey`]. Mutations on objects that
//! are marked observed are reported to the installed [`ChangeListener`]
//! unless the graph is muted, which is how remotely originated changes are
//! applied without being echoed back.

use crate::change::{Change, ChangeListener};
use crate::error::{ModelError, Result};
use crate::object::{Node, Object, ObjectKey, ObjectKind, Property, Slot};
use crate::template::{NodeTemplate, PropertyTemplate};
use crate::types::TypeRegistry;
use crate::value::Value;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

/// A graph shared between the host and a replicator.
pub type SharedGraph = Arc<Mutex<Graph>>;

#[derive(Debug)]
struct Entry {
    generation: u32,
    object: Option<Object>,
    observed: bool,
}

/// The object graph.
#[derive(Default)]
pub struct Graph {
    entries: Vec<Entry>,
    free: Vec<u32>,
    live: usize,
    listener: Option<Arc<dyn ChangeListener>>,
    muted: bool,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a graph for sharing.
    pub fn shared(self) -> SharedGraph {
        Arc::new(Mutex::new(self))
    }

    /// Number of live objects, containers included.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Keys of all live objects in slot order.
    pub fn keys(&self) -> impl Iterator<Item = ObjectKey> + '_ {
        self.entries.iter().enumerate().filter_map(|(index, entry)| {
            entry
                .object
                .as_ref()
                .map(|_| ObjectKey::new(index as u32, entry.generation))
        })
    }

    fn alloc(&mut self, object: Object) -> ObjectKey {
        self.live += 1;
        match self.free.pop() {
            Some(index) => {
                let entry = &mut self.entries[index as usize];
                entry.object = Some(object);
                entry.observed = false;
                ObjectKey::new(index, entry.generation)
            }
            None => {
                let index = self.entries.len() as u32;
                self.entries.push(Entry {
                    generation: 0,
                    object: Some(object),
                    observed: false,
                });
                ObjectKey::new(index, 0)
            }
        }
    }

    /// Insert a new node shaped by `template`, allocating its containers.
    pub fn insert_node(&mut self, template: NodeTemplate) -> ObjectKey {
        let properties = template
            .properties
            .into_iter()
            .map(|(name, property)| {
                let slot = match property {
                    PropertyTemplate::Value(default) => Slot::Value(Value::Scalar(default)),
                    PropertyTemplate::List => Slot::Container(self.alloc(Object::List(Vec::new()))),
                    PropertyTemplate::Set => Slot::Container(self.alloc(Object::Set(Vec::new()))),
                    PropertyTemplate::Map => Slot::Container(self.alloc(Object::Map(Vec::new()))),
                };
                Property { name, slot }
            })
            .collect();

        self.alloc(Object::Node(Node {
            type_tag: template.type_tag,
            properties,
        }))
    }

    /// Insert a new node of a registered type.
    pub fn create(&mut self, types: &TypeRegistry, type_tag: &str) -> Result<ObjectKey> {
        let template = types
            .create(type_tag)
            .ok_or_else(|| ModelError::UnknownType(type_tag.to_string()))?;
        Ok(self.insert_node(template))
    }

    fn entry(&self, key: ObjectKey) -> Option<&Entry> {
        self.entries
            .get(key.index() as usize)
            .filter(|entry| entry.generation == key.generation() && entry.object.is_some())
    }

    fn entry_mut(&mut self, key: ObjectKey) -> Option<&mut Entry> {
        self.entries
            .get_mut(key.index() as usize)
            .filter(|entry| entry.generation == key.generation() && entry.object.is_some())
    }

    pub fn contains(&self, key: ObjectKey) -> bool {
        self.entry(key).is_some()
    }

    pub fn get(&self, key: ObjectKey) -> Option<&Object> {
        self.entry(key).and_then(|entry| entry.object.as_ref())
    }

    fn get_mut(&mut self, key: ObjectKey) -> Result<&mut Object> {
        self.entry_mut(key)
            .and_then(|entry| entry.object.as_mut())
            .ok_or(ModelError::StaleKey(key))
    }

    fn object(&self, key: ObjectKey) -> Result<&Object> {
        self.get(key).ok_or(ModelError::StaleKey(key))
    }

    pub fn kind(&self, key: ObjectKey) -> Result<ObjectKind> {
        self.object(key).map(Object::kind)
    }

    pub fn node(&self, key: ObjectKey) -> Result<&Node> {
        match self.object(key)? {
            Object::Node(node) => Ok(node),
            other => Err(wrong_kind(key, ObjectKind::Node, other)),
        }
    }

    /// Read a value property.
    pub fn property(&self, key: ObjectKey, name: &str) -> Result<&Value> {
        let node = self.node(key)?;
        match node.property(name).map(Property::slot) {
            Some(Slot::Value(value)) => Ok(value),
            Some(Slot::Container(_)) => Err(ModelError::NotAValueProperty(name.to_string())),
            None => Err(no_such_property(node, name)),
        }
    }

    /// Key of the container owned by a container property.
    pub fn container(&self, key: ObjectKey, name: &str) -> Result<ObjectKey> {
        let node = self.node(key)?;
        match node.property(name).map(Property::slot) {
            Some(Slot::Container(container)) => Ok(*container),
            Some(Slot::Value(_)) => Err(ModelError::NotAContainer(name.to_string())),
            None => Err(no_such_property(node, name)),
        }
    }

    pub fn list_items(&self, key: ObjectKey) -> Result<&[Value]> {
        match self.object(key)? {
            Object::List(items) => Ok(items),
            other => Err(wrong_kind(key, ObjectKind::List, other)),
        }
    }

    pub fn set_items(&self, key: ObjectKey) -> Result<&[Value]> {
        match self.object(key)? {
            Object::Set(items) => Ok(items),
            other => Err(wrong_kind(key, ObjectKind::Set, other)),
        }
    }

    pub fn map_entries(&self, key: ObjectKey) -> Result<&[(Value, Value)]> {
        match self.object(key)? {
            Object::Map(entries) => Ok(entries),
            other => Err(wrong_kind(key, ObjectKind::Map, other)),
        }
    }

    pub fn map_get(&self, key: ObjectKey, entry_key: &Value) -> Result<Option<&Value>> {
        Ok(self
            .map_entries(key)?
            .iter()
            .find(|(k, _)| k == entry_key)
            .map(|(_, v)| v))
    }

    /// Remove an object. Its key and every copy of it go stale; owned
    /// containers are left for the caller to remove.
    pub fn remove(&mut self, key: ObjectKey) -> Option<Object> {
        let entry = self.entry_mut(key)?;
        let object = entry.object.take();
        entry.observed = false;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(key.index());
        self.live -= 1;
        object
    }

    /// References may only point at live nodes.
    fn check_value(&self, value: &Value) -> Result<()> {
        match value {
            Value::Object(target) => self.node(*target).map(|_| ()),
            Value::Scalar(_) => Ok(()),
        }
    }

    /// Assign a value property, returning the previous value.
    ///
    /// Assigning an equal value is not a change and is not reported.
    pub fn set_property(
        &mut self,
        key: ObjectKey,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<Value> {
        let value = value.into();
        self.check_value(&value)?;

        let node = match self.get_mut(key)? {
            Object::Node(node) => node,
            other => return Err(wrong_kind(key, ObjectKind::Node, other)),
        };
        let type_tag = node.type_tag.clone();
        let slot = match node.property_mut(name) {
            Some(property) => &mut property.slot,
            None => {
                return Err(ModelError::NoSuchProperty {
                    type_tag,
                    property: name.to_string(),
                })
            }
        };
        let current = match slot {
            Slot::Value(current) => current,
            Slot::Container(_) => return Err(ModelError::NotAValueProperty(name.to_string())),
        };
        if *current == value {
            return Ok(value);
        }
        let old = std::mem::replace(current, value.clone());

        self.notify(Change::PropertySet {
            node: key,
            property: name.to_string(),
            old: old.clone(),
            new: value,
        });
        Ok(old)
    }

    fn list_mut(&mut self, key: ObjectKey) -> Result<&mut Vec<Value>> {
        match self.get_mut(key)? {
            Object::List(items) => Ok(items),
            other => Err(wrong_kind(key, ObjectKind::List, other)),
        }
    }

    fn set_mut(&mut self, key: ObjectKey) -> Result<&mut Vec<Value>> {
        match self.get_mut(key)? {
            Object::Set(items) => Ok(items),
            other => Err(wrong_kind(key, ObjectKind::Set, other)),
        }
    }

    fn map_mut(&mut self, key: ObjectKey) -> Result<&mut Vec<(Value, Value)>> {
        match self.get_mut(key)? {
            Object::Map(entries) => Ok(entries),
            other => Err(wrong_kind(key, ObjectKind::Map, other)),
        }
    }

    /// Insert into a list at `index`; `index == len` appends.
    pub fn list_insert(
        &mut self,
        key: ObjectKey,
        index: usize,
        value: impl Into<Value>,
    ) -> Result<()> {
        let value = value.into();
        self.check_value(&value)?;
        let items = self.list_mut(key)?;
        if index > items.len() {
            return Err(ModelError::IndexOutOfBounds {
                index,
                length: items.len(),
            });
        }
        items.insert(index, value.clone());
        self.notify(Change::ListInserted {
            list: key,
            index,
            value,
        });
        Ok(())
    }

    /// Append to a list, returning the index of the new element.
    pub fn list_push(&mut self, key: ObjectKey, value: impl Into<Value>) -> Result<usize> {
        let index = self.list_items(key)?.len();
        self.list_insert(key, index, value)?;
        Ok(index)
    }

    pub fn list_remove(&mut self, key: ObjectKey, index: usize) -> Result<Value> {
        let items = self.list_mut(key)?;
        if index >= items.len() {
            return Err(ModelError::IndexOutOfBounds {
                index,
                length: items.len(),
            });
        }
        let value = items.remove(index);
        self.notify(Change::ListRemoved {
            list: key,
            index,
            value: value.clone(),
        });
        Ok(value)
    }

    /// Add to a set. Returns false, and reports nothing, if already present.
    pub fn set_insert(&mut self, key: ObjectKey, value: impl Into<Value>) -> Result<bool> {
        let value = value.into();
        self.check_value(&value)?;
        let items = self.set_mut(key)?;
        if items.contains(&value) {
            return Ok(false);
        }
        items.push(value.clone());
        self.notify(Change::SetInserted { set: key, value });
        Ok(true)
    }

    pub fn set_remove(&mut self, key: ObjectKey, value: &Value) -> Result<bool> {
        let items = self.set_mut(key)?;
        let Some(position) = items.iter().position(|v| v == value) else {
            return Ok(false);
        };
        let value = items.remove(position);
        self.notify(Change::SetRemoved { set: key, value });
        Ok(true)
    }

    /// Put an entry, returning the value it replaced.
    pub fn map_insert(
        &mut self,
        key: ObjectKey,
        entry_key: impl Into<Value>,
        value: impl Into<Value>,
    ) -> Result<Option<Value>> {
        let entry_key = entry_key.into();
        let value = value.into();
        self.check_value(&entry_key)?;
        self.check_value(&value)?;

        let entries = self.map_mut(key)?;
        let old = match entries.iter_mut().find(|(k, _)| *k == entry_key) {
            Some((_, current)) if *current == value => return Ok(Some(value)),
            Some((_, current)) => Some(std::mem::replace(current, value.clone())),
            None => {
                entries.push((entry_key.clone(), value.clone()));
                None
            }
        };
        self.notify(Change::MapPut {
            map: key,
            key: entry_key,
            old: old.clone(),
            value,
        });
        Ok(old)
    }

    pub fn map_remove(&mut self, key: ObjectKey, entry_key: &Value) -> Result<Option<Value>> {
        let entries = self.map_mut(key)?;
        let Some(position) = entries.iter().position(|(k, _)| k == entry_key) else {
            return Ok(None);
        };
        let (entry_key, value) = entries.remove(position);
        self.notify(Change::MapRemoved {
            map: key,
            key: entry_key,
            value: value.clone(),
        });
        Ok(Some(value))
    }

    /// Install the listener that receives changes to observed objects.
    pub fn set_listener(&mut self, listener: Arc<dyn ChangeListener>) {
        self.listener = Some(listener);
    }

    pub fn clear_listener(&mut self) {
        self.listener = None;
    }

    /// Start reporting changes to `key`. Returns false if it was already
    /// observed or is not live.
    pub fn observe(&mut self, key: ObjectKey) -> bool {
        match self.entry_mut(key) {
            Some(entry) if !entry.observed => {
                entry.observed = true;
                true
            }
            _ => false,
        }
    }

    pub fn unobserve(&mut self, key: ObjectKey) {
        if let Some(entry) = self.entry_mut(key) {
            entry.observed = false;
        }
    }

    pub fn is_observed(&self, key: ObjectKey) -> bool {
        self.entry(key).is_some_and(|entry| entry.observed)
    }

    /// Run `f` with change reporting suppressed.
    ///
    /// The previous setting is restored even if `f` panics.
    pub fn muted<R>(&mut self, f: impl FnOnce(&mut Graph) -> R) -> R {
        let previous = std::mem::replace(&mut self.muted, true);
        let mut guard = MuteGuard {
            graph: self,
            previous,
        };
        let result = f(&mut *guard.graph);
        drop(guard);
        result
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    fn notify(&mut self, change: Change) {
        if self.muted || !self.is_observed(change.object()) {
            return;
        }
        if let Some(listener) = self.listener.clone() {
            listener.on_change(self, &change);
        }
    }

    /// Keys `key` points at directly. Empty for stale keys.
    pub fn children(&self, key: ObjectKey) -> Vec<ObjectKey> {
        self.get(key).map(Object::children).unwrap_or_default()
    }

    /// Every live object reachable from `root`, root first, in breadth-first
    /// order.
    pub fn reachable_from(&self, root: ObjectKey) -> Vec<ObjectKey> {
        let mut order = Vec::new();
        if !self.contains(root) {
            return order;
        }
        let mut seen = HashSet::from([root]);
        let mut queue = VecDeque::from([root]);
        while let Some(key) = queue.pop_front() {
            order.push(key);
            for child in self.children(key) {
                if self.contains(child) && seen.insert(child) {
                    queue.push_back(child);
                }
            }
        }
        order
    }
}

/// Puts the mute flag back when dropped.
struct MuteGuard<'a> {
    graph: &'a mut Graph,
    previous: bool,
}

impl Drop for MuteGuard<'_> {
    fn drop(&mut self) {
        self.graph.muted = self.previous;
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("live", &self.live)
            .field("slots", &self.entries.len())
            .field("listener", &self.listener.is_some())
            .field("muted", &self.muted)
            .finish()
    }
}

fn wrong_kind(key: ObjectKey, expected: ObjectKind, found: &Object) -> ModelError {
    ModelError::WrongKind {
        key,
        expected,
        found: found.kind(),
    }
}

fn no_such_property(node: &Node, name: &str) -> ModelError {
    ModelError::NoSuchProperty {
        type_tag: node.type_tag.clone(),
        property: name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Scalar;

    struct Recorder(Mutex<Vec<Change>>);

    impl ChangeListener for Recorder {
        fn on_change(&self, _graph: &mut Graph, change: &Change) {
            self.0.lock().push(change.clone());
        }
    }

    fn note() -> NodeTemplate {
        NodeTemplate::new("Note").value("text", "").value("next", Scalar::Null)
    }

    fn board() -> NodeTemplate {
        NodeTemplate::new("Board")
            .value("title", "")
            .list("notes")
            .set("tags")
            .map("pins")
    }

    fn recording(graph: &mut Graph) -> Arc<Recorder> {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        graph.set_listener(recorder.clone());
        recorder
    }

    #[test]
    fn test_insert_node_allocates_containers() {
        let mut graph = Graph::new();
        let board = graph.insert_node(board());

        assert_eq!(graph.len(), 4);
        assert_eq!(graph.kind(board).unwrap(), ObjectKind::Node);
        let notes = graph.container(board, "notes").unwrap();
        assert_eq!(graph.kind(notes).unwrap(), ObjectKind::List);
        assert_eq!(graph.kind(graph.container(board, "pins").unwrap()).unwrap(), ObjectKind::Map);
        assert_eq!(graph.property(board, "title").unwrap(), &Value::from(""));
    }

    #[test]
    fn test_property_errors() {
        let mut graph = Graph::new();
        let board = graph.insert_node(board());

        assert!(matches!(
            graph.property(board, "missing"),
            Err(ModelError::NoSuchProperty { .. })
        ));
        assert!(matches!(
            graph.property(board, "notes"),
            Err(ModelError::NotAValueProperty(_))
        ));
        assert!(matches!(
            graph.container(board, "title"),
            Err(ModelError::NotAContainer(_))
        ));
        let notes = graph.container(board, "notes").unwrap();
        assert!(matches!(
            graph.set_items(notes),
            Err(ModelError::WrongKind { expected: ObjectKind::Set, found: ObjectKind::List, .. })
        ));
    }

    #[test]
    fn test_remove_bumps_generation() {
        let mut graph = Graph::new();
        let first = graph.insert_node(note());
        graph.remove(first).unwrap();
        assert!(!graph.contains(first));

        let second = graph.insert_node(note());
        assert_eq!(second.index(), first.index());
        assert_ne!(second, first);
        assert!(matches!(graph.node(first), Err(ModelError::StaleKey(_))));
        assert!(graph.remove(first).is_none());
    }

    #[test]
    fn test_references_must_be_live_nodes() {
        let mut graph = Graph::new();
        let a = graph.insert_node(note());
        let b = graph.insert_node(note());
        let board = graph.insert_node(board());
        let notes = graph.container(board, "notes").unwrap();

        graph.set_property(a, "next", b).unwrap();
        assert!(matches!(
            graph.set_property(a, "next", notes),
            Err(ModelError::WrongKind { .. })
        ));
        graph.remove(b);
        assert!(matches!(
            graph.list_push(notes, b),
            Err(ModelError::StaleKey(_))
        ));
    }

    #[test]
    fn test_list_operations() {
        let mut graph = Graph::new();
        let board = graph.insert_node(board());
        let notes = graph.container(board, "notes").unwrap();

        graph.list_push(notes, "b").unwrap();
        graph.list_insert(notes, 0, "a").unwrap();
        graph.list_push(notes, "c").unwrap();
        assert_eq!(
            graph.list_items(notes).unwrap(),
            &[Value::from("a"), Value::from("b"), Value::from("c")]
        );

        assert_eq!(graph.list_remove(notes, 1).unwrap(), Value::from("b"));
        assert!(matches!(
            graph.list_insert(notes, 5, "x"),
            Err(ModelError::IndexOutOfBounds { index: 5, length: 2 })
        ));
        assert!(graph.list_remove(notes, 2).is_err());
    }

    #[test]
    fn test_set_and_map_operations() {
        let mut graph = Graph::new();
        let board = graph.insert_node(board());
        let tags = graph.container(board, "tags").unwrap();
        let pins = graph.container(board, "pins").unwrap();

        assert!(graph.set_insert(tags, "red").unwrap());
        assert!(!graph.set_insert(tags, "red").unwrap());
        assert!(graph.set_remove(tags, &Value::from("red")).unwrap());
        assert!(!graph.set_remove(tags, &Value::from("red")).unwrap());

        assert_eq!(graph.map_insert(pins, "k", 1).unwrap(), None);
        assert_eq!(graph.map_insert(pins, "k", 2).unwrap(), Some(Value::from(1)));
        assert_eq!(graph.map_get(pins, &Value::from("k")).unwrap(), Some(&Value::from(2)));
        assert_eq!(graph.map_remove(pins, &Value::from("k")).unwrap(), Some(Value::from(2)));
        assert_eq!(graph.map_remove(pins, &Value::from("k")).unwrap(), None);
    }

    #[test]
    fn test_only_observed_objects_report() {
        let mut graph = Graph::new();
        let recorder = recording(&mut graph);
        let a = graph.insert_node(note());
        let b = graph.insert_node(note());
        graph.observe(a);

        graph.set_property(a, "text", "hello").unwrap();
        graph.set_property(b, "text", "ignored").unwrap();

        let changes = recorder.0.lock().clone();
        assert_eq!(
            changes,
            vec![Change::PropertySet {
                node: a,
                property: "text".into(),
                old: Value::from(""),
                new: Value::from("hello"),
            }]
        );
    }

    #[test]
    fn test_equal_assignment_is_silent() {
        let mut graph = Graph::new();
        let recorder = recording(&mut graph);
        let a = graph.insert_node(note());
        graph.observe(a);

        graph.set_property(a, "text", "").unwrap();
        assert!(recorder.0.lock().is_empty());
    }

    #[test]
    fn test_muted_suppresses_and_restores() {
        let mut graph = Graph::new();
        let recorder = recording(&mut graph);
        let a = graph.insert_node(note());
        graph.observe(a);

        graph.muted(|g| {
            g.set_property(a, "text", "quiet").unwrap();
            g.muted(|g| g.set_property(a, "text", "quieter").unwrap());
            assert!(g.is_muted());
        });
        assert!(!graph.is_muted());
        assert!(recorder.0.lock().is_empty());

        graph.set_property(a, "text", "loud").unwrap();
        assert_eq!(recorder.0.lock().len(), 1);
    }

    #[test]
    fn test_muted_restores_after_panic() {
        let mut graph = Graph::new();
        let recorder = recording(&mut graph);
        let a = graph.insert_node(note());
        graph.observe(a);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            graph.muted(|g| {
                g.set_property(a, "text", "quiet").unwrap();
                panic!("failed mid-batch");
            })
        }));
        assert!(result.is_err());
        assert!(!graph.is_muted());

        graph.set_property(a, "text", "loud").unwrap();
        assert_eq!(recorder.0.lock().len(), 1);
    }

    #[test]
    fn test_reachable_handles_cycles() {
        let mut graph = Graph::new();
        let a = graph.insert_node(note());
        let b = graph.insert_node(note());
        let orphan = graph.insert_node(note());
        graph.set_property(a, "next", b).unwrap();
        graph.set_property(b, "next", a).unwrap();

        let reachable = graph.reachable_from(a);
        assert_eq!(reachable, vec![a, b]);
        assert!(!reachable.contains(&orphan));
    }

    #[test]
    fn test_listener_sees_applied_state() {
        struct Check(Mutex<Option<Value>>);
        impl ChangeListener for Check {
            fn on_change(&self, graph: &mut Graph, change: &Change) {
                if let Change::PropertySet { node, property, .. } = change {
                    *self.0.lock() = graph.property(*node, property).ok().cloned();
                }
            }
        }

        let mut graph = Graph::new();
        let check = Arc::new(Check(Mutex::new(None)));
        graph.set_listener(check.clone());
        let a = graph.insert_node(note());
        graph.observe(a);
        graph.set_property(a, "text", "seen").unwrap();
        assert_eq!(*check.0.lock(), Some(Value::from("seen")));
    }
}
