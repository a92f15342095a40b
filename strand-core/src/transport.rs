//! Transport abstraction
//!
//! The engine treats the network as an opaque message-send-and-receive
//! capability with peer identities plus the responsibility mapping from a
//! hash to the peer that should store records about it. Production wires a
//! real network behind [`Transport`]; tests and single-process meshes use
//! the in-memory [`MemMesh`].

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};
use strand_model::hash::Hash;
use strand_model::msg::{Message, PeerId};
use thiserror::Error;

/// Error type for transport operations.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Send to {0} timed out")]
    Timeout(PeerId),

    #[error("Unknown peer: {0}")]
    UnknownPeer(PeerId),

    #[error("Peer went away: {0}")]
    PeerGone(PeerId),
}

impl TransportError {
    /// Transient failures are retried by the action pipeline with capped
    /// backoff; the rest surface immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Timeout(_) | TransportError::PeerGone(_))
    }
}

/// An inbound message sink; every peer's engine implements this.
#[async_trait]
pub trait MsgReceiver: Send + Sync {
    async fn receive(&self, msg: Message) -> Message;
}

/// The network seam: peer identity, responsibility mapping, send.
#[async_trait]
pub trait Transport: Send + Sync {
    /// This peer's identity.
    fn self_id(&self) -> PeerId;

    /// Currently known peers, excluding self.
    fn peers(&self) -> Vec<PeerId>;

    /// The peer responsible for storing records about `hash`.
    fn peer_for(&self, hash: &Hash) -> PeerId;

    /// Send a request and await its reply.
    async fn send(&self, to: &PeerId, msg: Message) -> Result<Message, TransportError>;
}

/// How the in-memory mesh maps hashes to responsible peers.
#[derive(Clone, Copy, Debug)]
pub enum MeshRouting {
    /// Every peer is responsible for its own hashes (identity routing).
    SelfOnly,
    /// Deterministic: first digest byte modulo the registered peer count.
    ByDigest,
}

/// A single-process mesh of registered receivers standing in for a real
/// network. Holds receivers weakly so dropped engines just look like
/// departed peers.
pub struct MemMesh {
    routing: MeshRouting,
    nodes: Mutex<Vec<(PeerId, Weak<dyn MsgReceiver>)>>,
    offline: Mutex<HashSet<PeerId>>,
}

impl MemMesh {
    pub fn new(routing: MeshRouting) -> Arc<Self> {
        Arc::new(Self {
            routing,
            nodes: Mutex::new(Vec::new()),
            offline: Mutex::new(HashSet::new()),
        })
    }

    /// Join a peer to the mesh. Registration order is the routing order.
    pub fn register(&self, id: PeerId, receiver: Arc<dyn MsgReceiver>) {
        let mut nodes = self.nodes.lock().unwrap();
        nodes.retain(|(peer, _)| *peer != id);
        nodes.push((id, Arc::downgrade(&receiver)));
    }

    /// Simulate a partition: sends to an offline peer fail transiently.
    pub fn set_offline(&self, id: &PeerId, offline: bool) {
        let mut set = self.offline.lock().unwrap();
        if offline {
            set.insert(id.clone());
        } else {
            set.remove(id);
        }
    }

    fn ids(&self) -> Vec<PeerId> {
        self.nodes.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
    }

    fn lookup(&self, id: &PeerId) -> Option<Weak<dyn MsgReceiver>> {
        self.nodes
            .lock()
            .unwrap()
            .iter()
            .find(|(peer, _)| peer == id)
            .map(|(_, rx)| rx.clone())
    }

    fn route(&self, hash: &Hash, fallback: &PeerId) -> PeerId {
        match self.routing {
            MeshRouting::SelfOnly => fallback.clone(),
            MeshRouting::ByDigest => {
                let ids = self.ids();
                if ids.is_empty() {
                    return fallback.clone();
                }
                let byte = hash.as_bytes().get(2).copied().unwrap_or(0);
                ids[byte as usize % ids.len()].clone()
            }
        }
    }
}

/// One peer's view of a [`MemMesh`].
pub struct MemTransport {
    mesh: Arc<MemMesh>,
    id: PeerId,
}

impl MemTransport {
    pub fn new(mesh: Arc<MemMesh>, id: PeerId) -> Self {
        Self { mesh, id }
    }
}

#[async_trait]
impl Transport for MemTransport {
    fn self_id(&self) -> PeerId {
        self.id.clone()
    }

    fn peers(&self) -> Vec<PeerId> {
        self.mesh.ids().into_iter().filter(|p| *p != self.id).collect()
    }

    fn peer_for(&self, hash: &Hash) -> PeerId {
        self.mesh.route(hash, &self.id)
    }

    async fn send(&self, to: &PeerId, msg: Message) -> Result<Message, TransportError> {
        if self.mesh.offline.lock().unwrap().contains(to) {
            return Err(TransportError::Timeout(to.clone()));
        }
        let weak = self
            .mesh
            .lookup(to)
            .ok_or_else(|| TransportError::UnknownPeer(to.clone()))?;
        let receiver = weak.upgrade().ok_or_else(|| TransportError::PeerGone(to.clone()))?;
        Ok(receiver.receive(msg).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_model::hash::HashSpec;
    use strand_model::msg::{MsgBody, MsgKind};

    struct Echo {
        id: PeerId,
    }

    #[async_trait]
    impl MsgReceiver for Echo {
        async fn receive(&self, _msg: Message) -> Message {
            Message::new(MsgKind::Response, self.id.clone(), MsgBody::Ok("queued".into()))
        }
    }

    fn msg(from: &PeerId) -> Message {
        let h = HashSpec::default().sum(b"x").unwrap();
        Message::new(MsgKind::Put, from.clone(), MsgBody::PutReq { h })
    }

    #[tokio::test]
    async fn test_send_and_reply() {
        let mesh = MemMesh::new(MeshRouting::SelfOnly);
        let a = PeerId("a".into());
        let b = PeerId("b".into());
        let echo: Arc<dyn MsgReceiver> = Arc::new(Echo { id: b.clone() });
        mesh.register(b.clone(), echo.clone());

        let transport = MemTransport::new(mesh.clone(), a.clone());
        let reply = transport.send(&b, msg(&a)).await.unwrap();
        assert_eq!(reply.from, b);
        assert!(matches!(reply.body, MsgBody::Ok(_)));
    }

    #[tokio::test]
    async fn test_unknown_and_departed_peers() {
        let mesh = MemMesh::new(MeshRouting::SelfOnly);
        let a = PeerId("a".into());
        let ghost = PeerId("ghost".into());
        let transport = MemTransport::new(mesh.clone(), a.clone());

        assert!(matches!(
            transport.send(&ghost, msg(&a)).await,
            Err(TransportError::UnknownPeer(_))
        ));

        let echo: Arc<dyn MsgReceiver> = Arc::new(Echo { id: ghost.clone() });
        mesh.register(ghost.clone(), echo.clone());
        drop(echo);
        assert!(matches!(
            transport.send(&ghost, msg(&a)).await,
            Err(TransportError::PeerGone(_))
        ));
    }

    #[tokio::test]
    async fn test_offline_is_transient() {
        let mesh = MemMesh::new(MeshRouting::SelfOnly);
        let a = PeerId("a".into());
        let b = PeerId("b".into());
        let echo: Arc<dyn MsgReceiver> = Arc::new(Echo { id: b.clone() });
        mesh.register(b.clone(), echo.clone());
        mesh.set_offline(&b, true);

        let transport = MemTransport::new(mesh.clone(), a.clone());
        let err = transport.send(&b, msg(&a)).await.unwrap_err();
        assert!(err.is_transient());

        mesh.set_offline(&b, false);
        assert!(transport.send(&b, msg(&a)).await.is_ok());
    }

    #[test]
    fn test_routing() {
        let mesh = MemMesh::new(MeshRouting::ByDigest);
        let a = PeerId("a".into());
        let b = PeerId("b".into());
        let echo_a: Arc<dyn MsgReceiver> = Arc::new(Echo { id: a.clone() });
        let echo_b: Arc<dyn MsgReceiver> = Arc::new(Echo { id: b.clone() });
        mesh.register(a.clone(), echo_a.clone());
        mesh.register(b.clone(), echo_b.clone());

        let ta = MemTransport::new(mesh.clone(), a.clone());
        let tb = MemTransport::new(mesh.clone(), b.clone());
        assert_eq!(ta.peers(), vec![b.clone()]);

        // both views agree on responsibility
        let h = HashSpec::default().sum(b"somewhere").unwrap();
        assert_eq!(ta.peer_for(&h), tb.peer_for(&h));

        let self_mesh = MemMesh::new(MeshRouting::SelfOnly);
        let t = MemTransport::new(self_mesh.clone(), a.clone());
        assert_eq!(t.peer_for(&h), a);
    }
}
