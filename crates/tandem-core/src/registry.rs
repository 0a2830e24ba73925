//! Identity registry: the bidirectional map between arena keys and object ids.
//!
//! Liveness comes from the graph's generation checks. An entry whose key has
//! gone stale is never handed out and is dropped as soon as its id or key is
//! touched again, or when [`Registry::prune`] runs.
//!
//! Ids of reclaimed objects are remembered for a while as retired, so a late
//! command naming one can be told apart from one naming an id nobody ever
//! created.

use crate::command::ObjectId;
use std::collections::{HashMap, HashSet, VecDeque};
use tandem_model::{Graph, ObjectKey};

/// How many retired ids are remembered before the oldest is forgotten.
pub const RETIRED_CAPACITY: usize = 4096;

#[derive(Debug, Default)]
pub struct Registry {
    ids: HashMap<ObjectKey, ObjectId>,
    objects: HashMap<ObjectId, ObjectKey>,
    retired: HashSet<ObjectId>,
    retired_order: VecDeque<ObjectId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The id of `key`, assigning a fresh one on first sight.
    pub fn id_for(&mut self, key: ObjectKey) -> ObjectId {
        if let Some(id) = self.ids.get(&key) {
            return *id;
        }
        let id = ObjectId::new();
        self.ids.insert(key, id);
        self.objects.insert(id, key);
        id
    }

    /// The id of `key`, if it has one.
    pub fn id_of(&self, key: ObjectKey) -> Option<ObjectId> {
        self.ids.get(&key).copied()
    }

    /// The live object registered under `id`.
    pub fn object_for(&self, graph: &Graph, id: ObjectId) -> Option<ObjectKey> {
        self.objects
            .get(&id)
            .copied()
            .filter(|key| graph.contains(*key))
    }

    /// Bind a remotely assigned id to a freshly created local object.
    ///
    /// # Panics
    ///
    /// Panics if `id` already names a different live object, or if `key`
    /// already carries a different id. Either means two replicas disagree on
    /// identity, which the host integration must never allow.
    pub fn register(&mut self, graph: &Graph, key: ObjectKey, id: ObjectId) {
        if let Some(existing) = self.objects.get(&id).copied() {
            if existing == key {
                return;
            }
            if graph.contains(existing) {
                panic!(
                    "object id {} is already bound to live object {}, refusing to rebind it to {}",
                    id, existing, key
                );
            }
            self.ids.remove(&existing);
        }
        if let Some(previous) = self.ids.get(&key).copied() {
            panic!(
                "object {} already has id {}, refusing to also bind {}",
                key, previous, id
            );
        }
        if self.retired.remove(&id) {
            self.retired_order.retain(|retired| *retired != id);
        }
        self.ids.insert(key, id);
        self.objects.insert(id, key);
    }

    /// Forget `key` and remember its id as retired. Returns the id.
    pub fn retire(&mut self, key: ObjectKey) -> Option<ObjectId> {
        let id = self.release(key)?;
        if self.retired.insert(id) {
            self.retired_order.push_back(id);
        }
        while self.retired_order.len() > RETIRED_CAPACITY {
            if let Some(oldest) = self.retired_order.pop_front() {
                self.retired.remove(&oldest);
            }
        }
        Some(id)
    }

    /// Whether `id` belonged to an object that has since been reclaimed.
    pub fn is_retired(&self, id: ObjectId) -> bool {
        self.retired.contains(&id)
    }

    /// Every registered key, live or not.
    pub fn keys(&self) -> impl Iterator<Item = ObjectKey> + '_ {
        self.ids.keys().copied()
    }

    /// Forget `key`. Returns the id it carried.
    pub fn release(&mut self, key: ObjectKey) -> Option<ObjectId> {
        let id = self.ids.remove(&key)?;
        self.objects.remove(&id);
        Some(id)
    }

    /// Drop every entry whose object is gone. Returns how many were dropped.
    pub fn prune(&mut self, graph: &Graph) -> usize {
        let before = self.ids.len();
        self.ids.retain(|key, _| graph.contains(*key));
        let ids = &self.ids;
        self.objects.retain(|_, key| ids.contains_key(key));
        before - self.ids.len()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
