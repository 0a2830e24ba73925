//! In-memory star network: peer routing, framing and connections.
//!
//! Every link carries frames, each frame one serialized batch of at most
//! `max_batch_size` commands. The server keeps a [`PeerRouter`] holding the
//! outgoing half of every registered peer's link; a client holds a
//! [`Connection`].

use crate::error::{Result, SdkError};
use crate::serializer::Serializer;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tandem_core::Command;
use tokio::sync::mpsc;
use tracing::trace;

/// Unique identifier for a peer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One serialized batch.
pub type Frame = Vec<u8>;

pub type FrameSender = mpsc::UnboundedSender<Frame>;
pub type FrameReceiver = mpsc::UnboundedReceiver<Frame>;

/// Serialize `commands` into frames of at most `max_batch_size` commands.
pub fn encode_frames(
    serializer: &dyn Serializer,
    commands: &[Command],
    max_batch_size: usize,
) -> Result<Vec<Frame>> {
    commands
        .chunks(max_batch_size.max(1))
        .map(|chunk| serializer.serialize(chunk))
        .collect()
}

/// Outgoing side of the star as seen from the server.
pub trait Transport: Send + Sync {
    /// Send to every registered peer.
    fn send(&self, commands: &[Command]) -> Result<()>;

    /// Send to every registered peer but one.
    fn send_except(&self, commands: &[Command], except: &PeerId) -> Result<()>;

    /// Send to a single peer.
    fn send_to(&self, peer_id: &PeerId, commands: &[Command]) -> Result<()>;
}

/// Routing table of registered peers.
pub struct PeerRouter {
    peers: RwLock<HashMap<PeerId, FrameSender>>,
    serializer: Arc<dyn Serializer>,
    max_batch_size: usize,
}

impl PeerRouter {
    pub fn new(serializer: Arc<dyn Serializer>, max_batch_size: usize) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            serializer,
            max_batch_size,
        }
    }

    pub fn encode_frames(&self, commands: &[Command]) -> Result<Vec<Frame>> {
        encode_frames(self.serializer.as_ref(), commands, self.max_batch_size)
    }

    /// Start routing live frames to `peer_id`.
    pub fn insert(&self, peer_id: PeerId, sender: FrameSender) {
        self.peers.write().insert(peer_id, sender);
    }

    /// Stop routing to `peer_id`. Dropping the sender closes the peer's
    /// inbound stream once it has drained.
    pub fn remove(&self, peer_id: &PeerId) -> bool {
        self.peers.write().remove(peer_id).is_some()
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.read().contains_key(peer_id)
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.peers.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    pub fn clear(&self) {
        self.peers.write().clear();
    }

    fn deliver(&self, commands: &[Command], accept: impl Fn(&PeerId) -> bool) -> Result<()> {
        if commands.is_empty() {
            return Ok(());
        }
        let frames = self.encode_frames(commands)?;
        for (peer_id, sender) in self.peers.read().iter() {
            if !accept(peer_id) {
                continue;
            }
            for frame in &frames {
                if sender.send(frame.clone()).is_err() {
                    trace!(peer = %peer_id, "peer link closed, frame dropped");
                    break;
                }
            }
        }
        Ok(())
    }
}

impl Transport for PeerRouter {
    fn send(&self, commands: &[Command]) -> Result<()> {
        self.deliver(commands, |_| true)
    }

    fn send_except(&self, commands: &[Command], except: &PeerId) -> Result<()> {
        self.deliver(commands, |peer_id| peer_id != except)
    }

    fn send_to(&self, peer_id: &PeerId, commands: &[Command]) -> Result<()> {
        if !self.contains(peer_id) {
            return Err(SdkError::PeerNotFound(peer_id.to_string()));
        }
        self.deliver(commands, |candidate| candidate == peer_id)
    }
}

/// The client end of a link to the server.
#[derive(Debug)]
pub struct Connection {
    peer_id: PeerId,
    outbound: FrameSender,
    inbound: FrameReceiver,
}

impl Connection {
    pub(crate) fn new(peer_id: PeerId, outbound: FrameSender, inbound: FrameReceiver) -> Self {
        Self {
            peer_id,
            outbound,
            inbound,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Push a raw frame to the server.
    pub fn send_frame(&self, frame: Frame) -> Result<()> {
        self.outbound
            .send(frame)
            .map_err(|_| SdkError::Disconnected)
    }

    /// Next frame from the server, or `None` once the server dropped the link.
    pub async fn recv_frame(&mut self) -> Option<Frame> {
        self.inbound.recv().await
    }

    pub(crate) fn into_parts(self) -> (PeerId, FrameSender, FrameReceiver) {
        (self.peer_id, self.outbound, self.inbound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::JsonSerializer;
    use tandem_core::ObjectId;

    fn router(max_batch_size: usize) -> PeerRouter {
        PeerRouter::new(Arc::new(JsonSerializer), max_batch_size)
    }

    fn batch(len: usize) -> Vec<Command> {
        (0..len).map(|_| Command::set_root(ObjectId::new())).collect()
    }

    fn drain(rx: &mut FrameReceiver) -> Vec<Command> {
        let mut commands = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            commands.extend(JsonSerializer.deserialize(&frame).unwrap());
        }
        commands
    }

    #[test]
    fn test_frames_are_chunked() {
        let frames = router(2).encode_frames(&batch(5)).unwrap();
        assert_eq!(frames.len(), 3);
        let sizes: Vec<_> = frames
            .iter()
            .map(|f| JsonSerializer.deserialize(f).unwrap().len())
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_send_variants() {
        let router = router(10);
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        let a = PeerId::new("a");
        let b = PeerId::new("b");
        router.insert(a.clone(), a_tx);
        router.insert(b.clone(), b_tx);

        let all = batch(2);
        router.send(&all).unwrap();
        assert_eq!(drain(&mut a_rx), all);
        assert_eq!(drain(&mut b_rx), all);

        let some = batch(1);
        router.send_except(&some, &a).unwrap();
        assert!(drain(&mut a_rx).is_empty());
        assert_eq!(drain(&mut b_rx), some);

        router.send_to(&a, &some).unwrap();
        assert_eq!(drain(&mut a_rx), some);
        assert!(drain(&mut b_rx).is_empty());

        assert!(router.remove(&b));
        assert_eq!(
            router.send_to(&b, &some),
            Err(SdkError::PeerNotFound("b".into()))
        );
    }

    #[test]
    fn test_closed_peer_does_not_fail_others() {
        let router = router(10);
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        router.insert(PeerId::new("a"), a_tx);
        router.insert(PeerId::new("b"), b_tx);
        drop(a_rx);

        let all = batch(3);
        router.send(&all).unwrap();
        assert_eq!(drain(&mut b_rx), all);
    }
}
