//! A leaf of the star.
//!
//! A client starts with an empty graph. The server's snapshot builds the
//! model; from then on local changes flow upstream and the server's batches
//! flow down. Batches the client sent itself come back as echoes and are
//! dropped by the replicator.

use crate::error::{Result, SdkError};
use crate::network::{encode_frames, Connection, FrameReceiver, FrameSender, PeerId};
use crate::serializer::{JsonSerializer, Serializer};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tandem_core::{
    Command, Dispatcher, InlineDispatcher, ReplicationError, Replicator, Topology,
    DEFAULT_RECLAIM_GRACE,
};
use tandem_model::{Graph, ObjectKey, SharedGraph, TypeRegistry};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Configuration for a [`Client`].
#[derive(Clone)]
pub struct ClientConfig {
    /// Name used in logs.
    pub name: String,
    /// Maximum number of commands per frame.
    pub max_batch_size: usize,
    /// Encoding of frames. Must match the server's.
    pub serializer: Arc<dyn Serializer>,
    /// Where inbound batches are applied to the graph.
    pub dispatcher: Arc<dyn Dispatcher>,
    /// Refreshes a detached object is kept before it is reclaimed.
    pub reclaim_grace: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "tandem-client".to_string(),
            max_batch_size: 500,
            serializer: Arc::new(JsonSerializer),
            dispatcher: Arc::new(InlineDispatcher),
            reclaim_grace: DEFAULT_RECLAIM_GRACE,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("name", &self.name)
            .field("max_batch_size", &self.max_batch_size)
            .field("reclaim_grace", &self.reclaim_grace)
            .finish_non_exhaustive()
    }
}

/// Builder for client configuration.
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
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

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Events emitted by a client.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    /// The snapshot installed a root; the model is usable.
    ModelReady(ObjectKey),
    /// A frame from the server could not be decoded and was skipped.
    BatchDropped(String),
    /// The server sent a batch that could not be applied. The link is closed.
    Failed(String),
    Disconnected,
    Error(String),
}

#[derive(Clone, Copy, Debug, Default)]
struct LinkState {
    root: Option<ObjectKey>,
    closed: bool,
}

struct ClientTopology {
    name: String,
    upstream: Mutex<Option<FrameSender>>,
    serializer: Arc<dyn Serializer>,
    max_batch_size: usize,
    state: watch::Sender<LinkState>,
    events: broadcast::Sender<ClientEvent>,
}

impl ClientTopology {
    fn close(&self) {
        self.upstream.lock().take();
        self.state.send_modify(|state| state.closed = true);
    }
}

impl Topology for ClientTopology {
    fn send_commands(&self, commands: Vec<Command>) {
        let upstream = self.upstream.lock();
        let Some(sender) = upstream.as_ref() else {
            trace!(client = %self.name, commands = commands.len(), "link closed, local changes not sent");
            return;
        };
        match encode_frames(self.serializer.as_ref(), &commands, self.max_batch_size) {
            Ok(frames) => {
                for frame in frames {
                    if sender.send(frame).is_err() {
                        trace!(client = %self.name, "server link closed");
                        break;
                    }
                }
            }
            Err(error) => {
                warn!(client = %self.name, %error, "could not encode local changes");
                let _ = self.events.send(ClientEvent::Error(error.to_string()));
            }
        }
    }

    fn root_changed(&self, root: ObjectKey) {
        debug!(client = %self.name, %root, "model ready");
        self.state.send_modify(|state| state.root = Some(root));
        let _ = self.events.send(ClientEvent::ModelReady(root));
    }

    fn on_error(&self, error: &ReplicationError) {
        warn!(client = %self.name, %error, "replication error");
        let _ = self.events.send(ClientEvent::Error(error.to_string()));
    }
}

struct Inner {
    config: ClientConfig,
    peer_id: PeerId,
    replicator: Replicator,
    topology: Arc<ClientTopology>,
    events: broadcast::Sender<ClientEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// The client endpoint.
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Start replicating over `connection` into a fresh graph.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(connection: Connection, types: Arc<TypeRegistry>, config: ClientConfig) -> Self {
        let (peer_id, outbound, inbound) = connection.into_parts();
        let (events, _) = broadcast::channel(256);
        let (state, _) = watch::channel(LinkState::default());
        let topology = Arc::new(ClientTopology {
            name: config.name.clone(),
            upstream: Mutex::new(Some(outbound)),
            serializer: config.serializer.clone(),
            max_batch_size: config.max_batch_size,
            state,
            events: events.clone(),
        });
        let replicator = Replicator::with_dispatcher(
            Graph::new().shared(),
            types,
            topology.clone(),
            config.dispatcher.clone(),
        );
        replicator.set_reclaim_grace(config.reclaim_grace);
        info!(client = %config.name, peer = %peer_id, "connected");

        let inner = Arc::new(Inner {
            config,
            peer_id,
            replicator,
            topology,
            events,
            task: Mutex::new(None),
        });
        {
            let mut task = inner.task.lock();
            *task = Some(tokio::spawn(receive(inner.clone(), inbound)));
        }
        Self { inner }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.inner.peer_id
    }

    pub fn graph(&self) -> SharedGraph {
        self.inner.replicator.graph()
    }

    pub fn replicator(&self) -> &Replicator {
        &self.inner.replicator
    }

    /// The root installed by the server, once the snapshot has arrived.
    pub fn root(&self) -> Option<ObjectKey> {
        self.inner.replicator.root()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Wait until the server's snapshot has installed a root.
    pub async fn wait_for_model(&self) -> Result<ObjectKey> {
        let mut state = self.inner.topology.state.subscribe();
        let state = state
            .wait_for(|state| state.root.is_some() || state.closed)
            .await
            .map_err(|_| SdkError::Disconnected)?;
        state.root.ok_or(SdkError::Disconnected)
    }

    /// Close the link. The graph stays readable.
    pub fn disconnect(&self) {
        if let Some(task) = self.inner.task.lock().take() {
            task.abort();
            self.inner.topology.close();
            info!(client = %self.inner.config.name, "disconnected");
            let _ = self.inner.events.send(ClientEvent::Disconnected);
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn receive(inner: Arc<Inner>, mut inbound: FrameReceiver) {
    while let Some(frame) = inbound.recv().await {
        let commands = match inner.config.serializer.deserialize(&frame) {
            Ok(commands) => commands,
            Err(error) => {
                warn!(client = %inner.config.name, %error, "undecodable frame dropped");
                let _ = inner.events.send(ClientEvent::BatchDropped(error.to_string()));
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
        warn!(client = %inner.config.name, %error, "closing link");
        inner.task.lock().take();
        inner.topology.close();
        let _ = inner.events.send(ClientEvent::Failed(error));
        return;
    }

    inner.task.lock().take();
    inner.topology.close();
    info!(client = %inner.config.name, "server closed the link");
    let _ = inner.events.send(ClientEvent::Disconnected);
}
