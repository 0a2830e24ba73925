//! The hub of the star.
//!
//! The server owns the authoritative graph. Each accepted peer first receives
//! a snapshot, then every batch the server accepts from any peer, the origin
//! included. A batch is rebroadcast while the server's graph is still locked
//! for it, so every peer sees batches and the server's own changes in the
//! order the server applied them.

use crate::error::{Result, SdkError};
use crate::network::{Connection, FrameReceiver, PeerId, PeerRouter, Transport};
use crate::serializer::{JsonSerializer, Serializer};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tandem_core::{
    Command, Dispatcher, InlineDispatcher, ReplicationError, Replicator, Topology,
    DEFAULT_RECLAIM_GRACE,
};
use tandem_model::{ObjectKey, SharedGraph, TypeRegistry};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Configuration for a [`Server`].
#[derive(Clone)]
pub struct ServerConfig {
    /// Name used in logs.
    pub name: String,
    /// Maximum number of commands per frame.
    pub max_batch_size: usize,
    /// Encoding of frames.
    pub serializer: Arc<dyn Serializer>,
    /// Where inbound batches are applied to the graph.
    pub dispatcher: Arc<dyn Dispatcher>,
    /// Refreshes a detached object is kept before it is reclaimed.
    pub reclaim_grace: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "tandem-server".to_string(),
            max_batch_size: 500,
            serializer: Arc::new(JsonSerializer),
            dispatcher: Arc::new(InlineDispatcher),
            reclaim_grace: DEFAULT_RECLAIM_GRACE,
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("name", &self.name)
            .field("max_batch_size", &self.max_batch_size)
            .field("reclaim_grace", &self.reclaim_grace)
            .finish_non_exhaustive()
    }
}

/// Builder for server configuration.
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.config.max_batch_size = size;
        self
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.config.serializer = serializer;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.config.dispatcher = dispatcher;
        self
    }

    pub fn reclaim_grace(mut self, refreshes: u64) -> Self {
        self.config.reclaim_grace = refreshes;
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Events emitted by a server.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerEvent {
    PeerConnected { peer_id: PeerId },
    PeerDisconnected { peer_id: PeerId },
    /// The peer sent something that could not be applied and was dropped.
    PeerFailed { peer_id: PeerId, error: String },
    /// A frame from the peer could not be decoded and was skipped.
    BatchDropped { peer_id: PeerId, error: String },
    Error(String),
}

/// Sends the server's own local changes to every peer.
struct ServerTopology {
    name: String,
    router: Arc<PeerRouter>,
    events: broadcast::Sender<ServerEvent>,
}

impl Topology for ServerTopology {
    fn send_commands(&self, commands: Vec<Command>) {
        if let Err(error) = self.router.send(&commands) {
            warn!(server = %self.name, %error, "could not send local changes");
            let _ = self.events.send(ServerEvent::Error(error.to_string()));
        }
    }

    fn batch_applied(&self, applied: &[Command]) {
        if let Err(error) = self.router.send(applied) {
            warn!(server = %self.name, %error, "rebroadcast failed");
            let _ = self.events.send(ServerEvent::Error(error.to_string()));
        }
    }

    fn on_error(&self, error: &ReplicationError) {
        warn!(server = %self.name, %error, "replication error");
        let _ = self.events.send(ServerEvent::Error(error.to_string()));
    }

    fn expects_echoes(&self) -> bool {
        false
    }
}

struct Inner {
    config: ServerConfig,
    replicator: Replicator,
    router: Arc<PeerRouter>,
    events: broadcast::Sender<ServerEvent>,
    tasks: Mutex<HashMap<PeerId, JoinHandle<()>>>,
}

/// The server endpoint.
pub struct Server {
    inner: Arc<Inner>,
}

impl Server {
    /// Serve the graph under `root`.
    pub fn new(
        graph: SharedGraph,
        root: ObjectKey,
        types: Arc<TypeRegistry>,
        config: ServerConfig,
    ) -> Result<Self> {
        let (events, _) = broadcast::channel(256);
        let router = Arc::new(PeerRouter::new(
            config.serializer.clone(),
            config.max_batch_size,
        ));
        let topology = Arc::new(ServerTopology {
            name: config.name.clone(),
            router: router.clone(),
            events: events.clone(),
        });
        let replicator =
            Replicator::with_dispatcher(graph, types, topology, config.dispatcher.clone());
        replicator.set_reclaim_grace(config.reclaim_grace);
        replicator.register_root(root)?;
        info!(server = %config.name, "serving graph");

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                replicator,
                router,
                events,
                tasks: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn graph(&self) -> SharedGraph {
        self.inner.replicator.graph()
    }

    pub fn replicator(&self) -> &Replicator {
        &self.inner.replicator
    }

    pub fn root(&self) -> Option<ObjectKey> {
        self.inner.replicator.root()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.events.subscribe()
    }

    /// Currently routed peers.
    pub fn peers(&self) -> Vec<PeerId> {
        self.inner.router.peers()
    }

    /// Accept a new peer: seed it with a snapshot, register it for live
    /// changes and start serving its inbound frames.
    pub async fn accept(&self, peer_id: PeerId) -> Result<Connection> {
        let (to_peer, from_server) = mpsc::unbounded_channel();
        let (to_server, from_peer) = mpsc::unbounded_channel();

        let inner = self.inner.clone();
        let peer = peer_id.clone();
        tokio::task::spawn_blocking(move || {
            let mut failure = None;
            inner
                .replicator
                .commands_for_current_graph(|snapshot| {
                    match inner.router.encode_frames(&snapshot) {
                        Ok(frames) => {
                            debug!(peer = %peer, commands = snapshot.len(), frames = frames.len(), "sending snapshot");
                            for frame in frames {
                                let _ = to_peer.send(frame);
                            }
                            inner.router.insert(peer, to_peer);
                        }
                        Err(error) => failure = Some(error),
                    }
                })?;
            failure.map_or(Ok(()), Err)
        })
        .await
        .map_err(|error| SdkError::ConnectionFailed(error.to_string()))??;

        info!(server = %self.inner.config.name, peer = %peer_id, "peer connected");
        let _ = self.inner.events.send(ServerEvent::PeerConnected {
            peer_id: peer_id.clone(),
        });
        {
            let mut tasks = self.inner.tasks.lock();
            let task = tokio::spawn(serve_peer(self.inner.clone(), peer_id.clone(), from_peer));
            if let Some(previous) = tasks.insert(peer_id.clone(), task) {
                previous.abort();
            }
        }

        Ok(Connection::new(peer_id, to_server, from_server))
    }

    /// Drop a peer. Its link is closed and its inbound task stopped.
    pub fn disconnect(&self, peer_id: &PeerId) -> Result<()> {
        let task = self.inner.tasks.lock().remove(peer_id);
        let routed = self.inner.router.remove(peer_id);
        match task {
            Some(task) => task.abort(),
            None if !routed => return Err(SdkError::PeerNotFound(peer_id.to_string())),
            None => {}
        }
        info!(server = %self.inner.config.name, peer = %peer_id, "peer disconnected");
        let _ = self.inner.events.send(ServerEvent::PeerDisconnected {
            peer_id: peer_id.clone(),
        });
        Ok(())
    }

    /// Stop serving every peer.
    pub fn shutdown(&self) {
        for (_, task) in self.inner.tasks.lock().drain() {
            task.abort();
        }
        self.inner.router.clear();
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Apply a peer's batches in arrival order until it goes away or misbehaves.
async fn serve_peer(inner: Arc<Inner>, peer_id: PeerId, mut inbound: FrameReceiver) {
    while let Some(frame) = inbound.recv().await {
        let commands = match inner.config.serializer.deserialize(&frame) {
            Ok(commands) => commands,
            Err(error) => {
                warn!(peer = %peer_id, %error, "undecodable frame dropped");
                let _ = inner.events.send(ServerEvent::BatchDropped {
                    peer_id: peer_id.clone(),
                    error: error.to_string(),
                });
                continue;
            }
        };

        let replicator = inner.replicator.clone();
        let outcome = tokio::task::spawn_blocking(move || replicator.execute(commands)).await;

        let error = match outcome {
            Ok(Ok(())) => continue,
            Ok(Err(error)) => error.to_string(),
            Err(error) => error.to_string(),
        };
        warn!(peer = %peer_id, %error, "dropping peer");
        inner.router.remove(&peer_id);
        inner.tasks.lock().remove(&peer_id);
        let _ = inner.events.send(ServerEvent::PeerFailed { peer_id, error });
        return;
    }

    inner.router.remove(&peer_id);
    inner.tasks.lock().remove(&peer_id);
    info!(peer = %peer_id, "peer link closed");
    let _ = inner.events.send(ServerEvent::PeerDisconnected { peer_id });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_model::{Graph, NodeTemplate};

    #[test]
    fn test_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.name, "tandem-server");
        assert_eq!(config.max_batch_size, 500);
        assert_eq!(config.reclaim_grace, DEFAULT_RECLAIM_GRACE);

        let config = ServerConfigBuilder::new()
            .name("hub")
            .max_batch_size(2)
            .reclaim_grace(0)
            .build();
        assert_eq!(config.name, "hub");
        assert_eq!(config.max_batch_size, 2);
        assert_eq!(config.reclaim_grace, 0);
    }

    #[tokio::test]
    async fn test_accept_sends_snapshot_and_registers_peer() {
        let types = Arc::new(TypeRegistry::new().with(NodeTemplate::new("Board").value("title", "")));
        let graph = Graph::new().shared();
        let root = graph.lock().create(&types, "Board").unwrap();
        let config = ServerConfigBuilder::new().max_batch_size(1).build();
        let server = Server::new(graph, root, types, config).unwrap();
        let mut events = server.subscribe();

        let mut connection = server.accept(PeerId::new("alice")).await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            ServerEvent::PeerConnected {
                peer_id: PeerId::new("alice")
            }
        );
        assert_eq!(server.peers(), vec![PeerId::new("alice")]);

        // CreateObject, SetValue and SetRoot, one frame each.
        for expected in ["CreateObject", "SetValue", "SetRoot"] {
            let frame = connection.recv_frame().await.unwrap();
            let batch = JsonSerializer.deserialize(&frame).unwrap();
            assert_eq!(batch.len(), 1);
            assert_eq!(batch[0].name(), expected);
        }
    }
}
