//! Change observer: keeps observation in step with reachability and turns
//! local changes into commands.
//!
//! Everything reachable from the root is observed. After any change that adds
//! or drops a reference, [`Observer::refresh`] observes what became
//! reachable and unobserves what did not. A registered object off the graph
//! is kept as a tombstone: it still resolves by id, so commands other peers
//! sent before they learned of the detach still apply, and attaching it again
//! revives it. Once it has stayed off the graph for the grace period, counted
//! in refreshes, its id is retired and its arena slot is freed.

use crate::command::{Command, ObjectId, WireValue};
use crate::error::Result;
use crate::registry::Registry;
use crate::walker;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use tandem_model::{Change, Graph, ObjectKey, Value};
use tracing::debug;

/// Refreshes a detached object survives before it is reclaimed.
pub const DEFAULT_RECLAIM_GRACE: u64 = 32;

/// Result of a reachability sweep.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sweep {
    /// Objects that started being observed.
    pub attached: usize,
    /// Registered objects newly found off the graph.
    pub detached: usize,
    /// Objects whose grace ran out and were reclaimed.
    pub reclaimed: usize,
}

#[derive(Debug)]
pub struct Observer {
    root: Option<ObjectKey>,
    attached: HashSet<ObjectKey>,
    /// Tombstones, with the refresh that first found each off the graph.
    detached: HashMap<ObjectKey, u64>,
    epoch: u64,
    grace: u64,
    /// Ids reclaimed since the last [`Observer::take_retired`].
    retired: Vec<ObjectId>,
}

impl Default for Observer {
    fn default() -> Self {
        Self::new()
    }
}

impl Observer {
    pub fn new() -> Self {
        Self {
            root: None,
            attached: HashSet::new(),
            detached: HashMap::new(),
            epoch: 0,
            grace: DEFAULT_RECLAIM_GRACE,
            retired: Vec::new(),
        }
    }

    pub fn with_grace(mut self, grace: u64) -> Self {
        self.grace = grace;
        self
    }

    pub fn set_grace(&mut self, grace: u64) {
        self.grace = grace;
    }

    pub fn root(&self) -> Option<ObjectKey> {
        self.root
    }

    /// Change the root. Takes effect at the next refresh.
    pub fn set_root(&mut self, root: ObjectKey) {
        self.root = Some(root);
    }

    pub fn is_attached(&self, key: ObjectKey) -> bool {
        self.attached.contains(&key)
    }

    pub fn is_detached(&self, key: ObjectKey) -> bool {
        self.detached.contains_key(&key)
    }

    pub fn attached_count(&self) -> usize {
        self.attached.len()
    }

    pub fn detached_count(&self) -> usize {
        self.detached.len()
    }

    /// Ids retired by refreshes since the last call.
    pub fn take_retired(&mut self) -> Vec<ObjectId> {
        std::mem::take(&mut self.retired)
    }

    /// Observe everything reachable from the root, tombstone every registered
    /// object that is not, and reclaim tombstones whose grace has run out.
    /// Does nothing before a root is set.
    ///
    /// Objects the host created but that never received an id are the
    /// host's to remove.
    pub fn refresh(&mut self, graph: &mut Graph, registry: &mut Registry) -> Sweep {
        let Some(root) = self.root else {
            return Sweep::default();
        };
        self.epoch += 1;
        let reachable: HashSet<ObjectKey> = graph.reachable_from(root).into_iter().collect();

        let mut sweep = Sweep::default();
        for key in &reachable {
            if graph.observe(*key) {
                sweep.attached += 1;
            }
            self.detached.remove(key);
        }

        let off_graph: Vec<ObjectKey> = self
            .attached
            .difference(&reachable)
            .copied()
            .chain(registry.keys().filter(|key| !reachable.contains(key)))
            .collect();
        for key in off_graph {
            if !graph.contains(key) {
                continue;
            }
            if let Entry::Vacant(entry) = self.detached.entry(key) {
                graph.unobserve(key);
                entry.insert(self.epoch);
                sweep.detached += 1;
            }
        }

        let epoch = self.epoch;
        let grace = self.grace;
        let expired: Vec<ObjectKey> = self
            .detached
            .iter()
            .filter(|(_, since)| epoch - **since >= grace)
            .map(|(key, _)| *key)
            .collect();
        for key in expired {
            self.detached.remove(&key);
            if let Some(id) = registry.retire(key) {
                self.retired.push(id);
            }
            if graph.remove(key).is_some() {
                sweep.reclaimed += 1;
            }
        }
        self.detached.retain(|key, _| graph.contains(*key));
        registry.prune(graph);
        self.attached = reachable;

        if sweep != Sweep::default() {
            debug!(
                attached = sweep.attached,
                detached = sweep.detached,
                reclaimed = sweep.reclaimed,
                total = self.attached.len(),
                tombstones = self.detached.len(),
                "observer refreshed"
            );
        }
        sweep
    }

    /// Describe a local change as commands: creation commands for any node it
    /// introduces, followed by the one command for the change itself.
    pub fn commands_for_change(
        &mut self,
        graph: &mut Graph,
        registry: &mut Registry,
        change: &Change,
    ) -> Result<Vec<Command>> {
        let mut commands = Vec::new();
        let object = registry.id_for(change.object());

        let command = {
            let graph: &Graph = graph;
            let mut introduce = |value: &Value, registry: &mut Registry| -> Result<WireValue> {
                match value {
                    Value::Scalar(scalar) => Ok(WireValue::Scalar(scalar.clone())),
                    Value::Object(key) => {
                        walker::commands_for_new_objects(graph, registry, *key, &mut commands)
                            .map(WireValue::Object)
                    }
                }
            };

            match change {
                Change::PropertySet { property, new, .. } => {
                    Command::set_value(object, property.clone(), introduce(new, registry)?)
                }
                Change::ListInserted { index, value, .. } => {
                    Command::add_to_list(object, *index, introduce(value, registry)?)
                }
                Change::ListRemoved { index, .. } => Command::remove_from_list(object, *index),
                Change::SetInserted { value, .. } => {
                    Command::add_to_set(object, introduce(value, registry)?)
                }
                Change::SetRemoved { value, .. } => {
                    Command::remove_from_set(object, known(value, registry))
                }
                Change::MapPut { key, value, .. } => {
                    let key = introduce(key, registry)?;
                    Command::put_to_map(object, key, introduce(value, registry)?)
                }
                Change::MapRemoved { key, .. } => {
                    Command::remove_from_map(object, known(key, registry))
                }
            }
        };
        commands.push(command);

        if change.touches_references() {
            self.refresh(graph, registry);
        }
        Ok(commands)
    }
}

/// A value that peers already know about.
fn known(value: &Value, registry: &mut Registry) -> WireValue {
    match value {
        Value::Scalar(scalar) => WireValue::Scalar(scalar.clone()),
        Value::Object(key) => WireValue::Object(registry.id_for(*key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Operation;
    use tandem_model::{NodeTemplate, Scalar};

    fn board() -> NodeTemplate {
        NodeTemplate::new("Board").value("x", 1).list("notes")
    }

    fn note() -> NodeTemplate {
        NodeTemplate::new("Note")
            .value("text", "")
            .value("next", Scalar::Null)
    }

    fn setup() -> (Graph, Registry, Observer, ObjectKey) {
        let mut graph = Graph::new();
        let mut registry = Registry::new();
        let mut observer = Observer::new();
        let root = graph.insert_node(board());
        walker::commands_for_graph(&graph, &mut registry, root).unwrap();
        observer.set_root(root);
        observer.refresh(&mut graph, &mut registry);
        (graph, registry, observer, root)
    }

    #[test]
    fn test_refresh_observes_reachable() {
        let (graph, _registry, observer, root) = setup();
        let notes = graph.container(root, "notes").unwrap();
        assert!(graph.is_observed(root));
        assert!(graph.is_observed(notes));
        assert_eq!(observer.attached_count(), 2);
    }

    #[test]
    fn test_refresh_without_root_is_noop() {
        let mut graph = Graph::new();
        let mut registry = Registry::new();
        let key = graph.insert_node(note());
        let sweep = Observer::new().refresh(&mut graph, &mut registry);
        assert_eq!(sweep, Sweep::default());
        assert!(!graph.is_observed(key));
    }

    #[test]
    fn test_scalar_change_is_one_command() {
        let (mut graph, mut registry, mut observer, root) = setup();
        let change = Change::PropertySet {
            node: root,
            property: "x".into(),
            old: Value::from(1),
            new: Value::from(2),
        };
        let commands = observer
            .commands_for_change(&mut graph, &mut registry, &change)
            .unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(
            commands[0].op,
            Operation::SetValue {
                target: registry.id_of(root).unwrap(),
                property: "x".into(),
                value: WireValue::Scalar(Scalar::Int(2)),
            }
        );
    }

    #[test]
    fn test_new_node_created_before_insert() {
        let (mut graph, mut registry, mut observer, root) = setup();
        let notes = graph.container(root, "notes").unwrap();
        let note = graph.insert_node(note());
        graph.list_push(notes, note).unwrap();

        let change = Change::ListInserted {
            list: notes,
            index: 0,
            value: Value::Object(note),
        };
        let commands = observer
            .commands_for_change(&mut graph, &mut registry, &change)
            .unwrap();
        let names: Vec<_> = commands.iter().map(Command::name).collect();
        assert_eq!(names, vec!["CreateObject", "SetValue", "SetValue", "AddToList"]);
        assert!(graph.is_observed(note));
        assert!(observer.is_attached(note));
    }

    #[test]
    fn test_detached_subtree_is_reclaimed_after_grace() {
        let (mut graph, mut registry, mut observer, root) = setup();
        observer.set_grace(2);
        let notes = graph.container(root, "notes").unwrap();
        let a = graph.insert_node(note());
        let b = graph.insert_node(note());
        graph.set_property(a, "next", b).unwrap();
        graph.list_push(notes, a).unwrap();
        observer.refresh(&mut graph, &mut registry);
        let a_id = registry.id_for(a);
        let b_id = registry.id_for(b);

        let removed = graph.list_remove(notes, 0).unwrap();
        let change = Change::ListRemoved {
            list: notes,
            index: 0,
            value: removed,
        };
        let commands = observer
            .commands_for_change(&mut graph, &mut registry, &change)
            .unwrap();
        assert_eq!(commands.len(), 1);

        // Tombstoned: unobserved but still resolvable.
        assert!(!graph.is_observed(a));
        assert!(observer.is_detached(a));
        assert!(observer.is_detached(b));
        assert_eq!(registry.object_for(&graph, a_id), Some(a));
        assert_eq!(observer.attached_count(), 2);

        let sweep = observer.refresh(&mut graph, &mut registry);
        assert_eq!(sweep.reclaimed, 0);
        assert!(graph.contains(a));

        let sweep = observer.refresh(&mut graph, &mut registry);
        assert_eq!(sweep.reclaimed, 2);
        assert!(!graph.contains(a));
        assert!(!graph.contains(b));
        assert_eq!(registry.object_for(&graph, a_id), None);
        assert!(registry.is_retired(a_id));
        assert_eq!(observer.detached_count(), 0);

        let mut retired = observer.take_retired();
        retired.sort();
        let mut expected = vec![a_id, b_id];
        expected.sort();
        assert_eq!(retired, expected);
        assert!(observer.take_retired().is_empty());
    }

    #[test]
    fn test_reattached_tombstone_is_revived() {
        let (mut graph, mut registry, mut observer, root) = setup();
        let notes = graph.container(root, "notes").unwrap();
        let a = graph.insert_node(note());
        graph.list_push(notes, a).unwrap();
        observer.refresh(&mut graph, &mut registry);
        let a_id = registry.id_for(a);

        graph.list_remove(notes, 0).unwrap();
        observer.refresh(&mut graph, &mut registry);
        assert!(observer.is_detached(a));

        graph.list_push(notes, a).unwrap();
        let change = Change::ListInserted {
            list: notes,
            index: 0,
            value: Value::Object(a),
        };
        let commands = observer
            .commands_for_change(&mut graph, &mut registry, &change)
            .unwrap();

        // Peers still hold the tombstone, so only the insert travels.
        let names: Vec<_> = commands.iter().map(Command::name).collect();
        assert_eq!(names, vec!["AddToList"]);
        assert!(graph.is_observed(a));
        assert!(!observer.is_detached(a));
        assert_eq!(registry.id_of(a), Some(a_id));
    }

    #[test]
    fn test_never_attached_object_is_swept() {
        let (mut graph, mut registry, mut observer, _root) = setup();
        observer.set_grace(1);
        let stray = graph.insert_node(note());
        let stray_id = ObjectId::new();
        registry.register(&graph, stray, stray_id);

        let sweep = observer.refresh(&mut graph, &mut registry);
        assert_eq!(sweep.detached, 1);
        assert!(observer.is_detached(stray));
        assert!(graph.contains(stray));

        let sweep = observer.refresh(&mut graph, &mut registry);
        assert_eq!(sweep.reclaimed, 1);
        assert!(!graph.contains(stray));
        assert!(registry.is_retired(stray_id));
    }

    #[test]
    fn test_zero_grace_reclaims_at_once() {
        let (mut graph, mut registry, mut observer, root) = setup();
        observer.set_grace(0);
        let notes = graph.container(root, "notes").unwrap();
        let a = graph.insert_node(note());
        graph.list_push(notes, a).unwrap();
        observer.refresh(&mut graph, &mut registry);
        registry.id_for(a);

        graph.list_remove(notes, 0).unwrap();
        let sweep = observer.refresh(&mut graph, &mut registry);
        assert_eq!(sweep.detached, 1);
        assert_eq!(sweep.reclaimed, 1);
        assert!(!graph.contains(a));
    }
}
