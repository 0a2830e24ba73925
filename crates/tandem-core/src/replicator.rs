//! The replication coordinator.
//!
//! A [`Replicator`] owns the identity registry, the observer and the echo log
//! for one shared graph and is the single point the transport layer talks to:
//! local changes leave through [`Topology::send_commands`], remote batches
//! come in through [`Replicator::execute`], and new peers are seeded through
//! [`Replicator::commands_for_current_graph`].
//!
//! Lock order is walk lock, then graph, then the registry/observer pair, then
//! the echo log and walk buffer. The graph's own mutex is taken by the host
//! for local mutations, so none of the methods here may be called while the
//! caller holds the graph lock.

use crate::command::{Command, ObjectId};
use crate::dispatch::{Dispatcher, InlineDispatcher};
use crate::error::{ReplicationError, Result};
use crate::executor::{CommandLog, Executor, Outcome};
use crate::observer::Observer;
use crate::registry::Registry;
use crate::walker;
use parking_lot::Mutex;
use std::sync::{mpsc, Arc, Weak};
use tandem_model::{Change, ChangeListener, Graph, ObjectKey, SharedGraph, TypeRegistry};
use tracing::{debug, warn};

/// The transport-facing side of a replicator.
pub trait Topology: Send + Sync {
    /// Deliver locally generated commands to the peers.
    ///
    /// Called with the graph lock held, so implementations must only queue.
    fn send_commands(&self, commands: Vec<Command>);

    /// A remote batch was applied; `applied` holds the commands of the
    /// applied prefix that other replicas need, in order. Commands skipped
    /// because they named a reclaimed object are left out.
    ///
    /// Called on the dispatcher's thread with the graph lock held, so relative
    /// to [`send_commands`](Topology::send_commands) this is seen in exactly
    /// the order the graph saw the changes. A hub rebroadcasts here.
    fn batch_applied(&self, _applied: &[Command]) {}

    /// A `SetRoot` installed a new root.
    fn root_changed(&self, _root: ObjectKey) {}

    /// Something went wrong outside of any particular batch.
    fn on_error(&self, _error: &ReplicationError) {}

    /// Whether local commands come back from the peers. A hub that
    /// rebroadcasts everything it applies but never receives its own
    /// changes returns false, and nothing is logged for suppression.
    fn expects_echoes(&self) -> bool {
        true
    }
}

struct Tracking {
    registry: Registry,
    observer: Observer,
}

struct Shared {
    graph: SharedGraph,
    tracking: Mutex<Tracking>,
    log: CommandLog,
    walk_lock: Mutex<()>,
    /// `Some` while a snapshot is being taken.
    walk_buffer: Mutex<Option<Vec<Command>>>,
    types: Arc<TypeRegistry>,
    topology: Arc<dyn Topology>,
    dispatcher: Arc<dyn Dispatcher>,
}

/// The result of applying one batch on the dispatcher's thread.
struct BatchReport {
    commands: Vec<Command>,
    applied: usize,
    visible: Vec<Command>,
    new_root: Option<ObjectKey>,
    error: Option<ReplicationError>,
}

#[derive(Clone)]
pub struct Replicator {
    shared: Arc<Shared>,
}

impl Replicator {
    /// Create a replicator that applies remote batches on the calling thread.
    pub fn new(graph: SharedGraph, types: Arc<TypeRegistry>, topology: Arc<dyn Topology>) -> Self {
        Self::with_dispatcher(graph, types, topology, Arc::new(InlineDispatcher))
    }

    pub fn with_dispatcher(
        graph: SharedGraph,
        types: Arc<TypeRegistry>,
        topology: Arc<dyn Topology>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        let shared = Arc::new(Shared {
            graph: graph.clone(),
            tracking: Mutex::new(Tracking {
                registry: Registry::new(),
                observer: Observer::new(),
            }),
            log: CommandLog::new(),
            walk_lock: Mutex::new(()),
            walk_buffer: Mutex::new(None),
            types,
            topology,
            dispatcher,
        });
        graph
            .lock()
            .set_listener(Arc::new(LocalChanges(Arc::downgrade(&shared))));
        Self { shared }
    }

    pub fn graph(&self) -> SharedGraph {
        self.shared.graph.clone()
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.shared.types
    }

    pub fn root(&self) -> Option<ObjectKey> {
        self.shared.tracking.lock().observer.root()
    }

    pub fn id_of(&self, key: ObjectKey) -> Option<ObjectId> {
        self.shared.tracking.lock().registry.id_of(key)
    }

    /// Resolve an id against a graph the caller has already locked.
    pub fn object_for(&self, graph: &Graph, id: ObjectId) -> Option<ObjectKey> {
        self.shared.tracking.lock().registry.object_for(graph, id)
    }

    /// Set how many refreshes a detached object survives before it is
    /// reclaimed. Zero reclaims it as soon as it leaves the graph.
    pub fn set_reclaim_grace(&self, refreshes: u64) {
        self.shared.tracking.lock().observer.set_grace(refreshes);
    }

    /// Local commands still waiting for their echo.
    pub fn outstanding_echoes(&self) -> usize {
        self.shared.log.outstanding()
    }

    /// Make `root` the root of the replicated graph and start observing
    /// everything reachable from it.
    pub fn register_root(&self, root: ObjectKey) -> Result<()> {
        let _walk = self.shared.walk_lock.lock();
        let mut graph = self.shared.graph.lock();
        let mut tracking = self.shared.tracking.lock();
        let Tracking { registry, observer } = &mut *tracking;

        let commands = walker::commands_for_graph(&graph, registry, root)?;
        observer.set_root(root);
        let sweep = observer.refresh(&mut graph, registry);
        self.shared.forget_retired(observer);
        debug!(
            root = %root,
            objects = registry.len(),
            attached = sweep.attached,
            commands = commands.len(),
            "root registered"
        );
        Ok(())
    }

    /// Apply a batch of remote commands.
    pub fn execute(&self, commands: Vec<Command>) -> Result<()> {
        self.execute_then(commands, |_| {})
    }

    /// Apply a batch of remote commands, then hand the commands of the
    /// applied prefix that took effect to `after` while the batch is still
    /// exclusive with respect to snapshots and other batches.
    ///
    /// On a protocol error the batch stops at the offending command; what was
    /// applied before it stays applied.
    pub fn execute_then(
        &self,
        commands: Vec<Command>,
        after: impl FnOnce(&[Command]),
    ) -> Result<()> {
        let walk = self.shared.walk_lock.lock();
        debug!(commands = commands.len(), "executing batch");

        let (tx, rx) = mpsc::sync_channel(1);
        let shared = self.shared.clone();
        self.shared.dispatcher.dispatch(Box::new(move || {
            let report = shared.apply_batch(commands);
            let _ = tx.send(report);
        }));
        let report = rx.recv().map_err(|_| ReplicationError::DispatchAborted)?;

        after(&report.visible);
        drop(walk);

        if let Some(root) = report.new_root {
            self.shared.topology.root_changed(root);
        }
        match report.error {
            Some(error) => {
                warn!(
                    %error,
                    applied = report.applied,
                    total = report.commands.len(),
                    "batch aborted"
                );
                Err(error)
            }
            None => Ok(()),
        }
    }

    /// Build the commands that reproduce the current graph and pass them to
    /// `callback` exactly once before returning.
    ///
    /// Local changes made after the walk and before the callback returns are
    /// sent to the existing peers as usual and also appended to the
    /// snapshot. The callback runs with live sends held back, so a peer it
    /// registers receives every later change after the snapshot and none
    /// before.
    pub fn commands_for_current_graph(&self, callback: impl FnOnce(Vec<Command>)) -> Result<()> {
        let _walk = self.shared.walk_lock.lock();
        let walked = {
            let graph = self.shared.graph.lock();
            let mut tracking = self.shared.tracking.lock();
            let Some(root) = tracking.observer.root() else {
                let error = ReplicationError::RootNotSet;
                self.shared.topology.on_error(&error);
                return Err(error);
            };
            *self.shared.walk_buffer.lock() = Some(Vec::new());
            walker::commands_for_graph(&graph, &mut tracking.registry, root)
        };

        let mut buffer = self.shared.walk_buffer.lock();
        let buffered = buffer.take().unwrap_or_default();
        let mut commands = walked?;
        debug!(
            walked = commands.len(),
            buffered = buffered.len(),
            "snapshot taken"
        );
        commands.extend(buffered);
        callback(commands);
        Ok(())
    }

    /// The commands reproducing the current graph.
    pub fn snapshot(&self) -> Result<Vec<Command>> {
        let mut snapshot = Vec::new();
        self.commands_for_current_graph(|commands| snapshot = commands)?;
        Ok(snapshot)
    }
}

impl Shared {
    fn apply_batch(&self, commands: Vec<Command>) -> BatchReport {
        let mut graph = self.graph.lock();
        let mut tracking = self.tracking.lock();
        let Tracking { registry, observer } = &mut *tracking;

        let (applied, visible, new_root, error) = graph.muted(|graph| {
            let mut executor = Executor {
                graph,
                registry: &mut *registry,
                observer: &mut *observer,
                types: &self.types,
                log: &self.log,
            };
            let mut applied = 0;
            let mut visible = Vec::new();
            let mut new_root = None;
            for command in &commands {
                match executor.execute_remote_command(command) {
                    Ok(outcome) => {
                        if let Outcome::RootChanged(root) = outcome {
                            new_root = Some(root);
                        }
                        if outcome.is_visible() {
                            visible.push(command.clone());
                        }
                    }
                    Err(error) => return (applied, visible, new_root, Some(error)),
                }
                applied += 1;
            }
            (applied, visible, new_root, None)
        });
        observer.refresh(&mut graph, registry);
        self.forget_retired(observer);
        if applied > visible.len() {
            debug!(skipped = applied - visible.len(), "commands on reclaimed objects skipped");
        }
        if !visible.is_empty() {
            self.topology.batch_applied(&visible);
        }

        BatchReport {
            commands,
            applied,
            visible,
            new_root,
            error,
        }
    }

    /// Pending echoes on reclaimed objects will never be matched.
    fn forget_retired(&self, observer: &mut Observer) {
        for id in observer.take_retired() {
            self.log.forget(id);
        }
    }

    fn publish_local_change(&self, graph: &mut Graph, change: &Change) {
        let commands = {
            let mut tracking = self.tracking.lock();
            let Tracking { registry, observer } = &mut *tracking;
            let described = observer.commands_for_change(graph, registry, change);
            self.forget_retired(observer);
            match described {
                Ok(commands) => commands,
                Err(error) => {
                    warn!(%error, ?change, "could not describe local change");
                    self.topology.on_error(&error);
                    return;
                }
            }
        };
        if self.topology.expects_echoes() {
            for command in &commands {
                self.log.log_local_command(command);
            }
        }

        let mut buffer = self.walk_buffer.lock();
        if let Some(buffer) = buffer.as_mut() {
            buffer.extend(commands.iter().cloned());
        }
        self.topology.send_commands(commands);
    }
}

/// Graph listener forwarding local changes to the replicator.
struct LocalChanges(Weak<Shared>);

impl ChangeListener for LocalChanges {
    fn on_change(&self, graph: &mut Graph, change: &Change) {
        if let Some(shared) = self.0.upgrade() {
            shared.publish_local_change(graph, change);
        }
    }
}
