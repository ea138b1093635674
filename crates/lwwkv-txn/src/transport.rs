//! Peer transport boundary used by the anti-entropy publisher.
//!
//! The real wire transport lives outside this crate. [`ChannelNetwork`]
//! connects nodes inside one process through tokio mpsc channels, which is
//! what the multi-node tests use.

use async_trait::async_trait;
use dashmap::DashSet;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::error::{Result, TxnError};
use crate::types::{NodeId, ReplicationBatch};

/// Sends replication batches to other nodes.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// ID of the local node, once known.
    fn local_id(&self) -> Option<NodeId>;

    /// Every node in the cluster, the local node included.
    fn node_ids(&self) -> Vec<NodeId>;

    /// Fire-and-forget delivery of `batch` to `dest`.
    async fn send_batch(&self, dest: &NodeId, batch: ReplicationBatch) -> Result<()>;
}

/// A batch together with the node that sent it.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Sending node.
    pub src: NodeId,
    /// Replicated records.
    pub batch: ReplicationBatch,
}

struct NetworkInner {
    members: Vec<NodeId>,
    inboxes: HashMap<NodeId, mpsc::UnboundedSender<Envelope>>,
    receivers: Mutex<HashMap<NodeId, mpsc::UnboundedReceiver<Envelope>>>,
    isolated: DashSet<NodeId>,
}

/// In-process network of nodes connected by channels.
#[derive(Clone)]
pub struct ChannelNetwork {
    inner: Arc<NetworkInner>,
}

impl ChannelNetwork {
    /// Creates a network with one inbox per node ID.
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let members: Vec<NodeId> = ids.into_iter().map(NodeId::new).collect();
        let mut inboxes = HashMap::new();
        let mut receivers = HashMap::new();
        for id in &members {
            let (tx, rx) = mpsc::unbounded_channel();
            inboxes.insert(id.clone(), tx);
            receivers.insert(id.clone(), rx);
        }
        Self {
            inner: Arc::new(NetworkInner {
                members,
                inboxes,
                receivers: Mutex::new(receivers),
                isolated: DashSet::new(),
            }),
        }
    }

    /// Transport handle for node `id`.
    pub fn transport(&self, id: &str) -> ChannelTransport {
        ChannelTransport {
            local: NodeId::new(id),
            network: self.clone(),
        }
    }

    /// Takes the inbox of node `id`. Returns `None` if unknown or already taken.
    pub async fn take_inbox(&self, id: &str) -> Option<mpsc::UnboundedReceiver<Envelope>> {
        self.inner.receivers.lock().await.remove(&NodeId::new(id))
    }

    /// Cuts node `id` off: sends to and from it fail until [`heal`](Self::heal).
    pub fn isolate(&self, id: &str) {
        self.inner.isolated.insert(NodeId::new(id));
    }

    /// Reconnects node `id`.
    pub fn heal(&self, id: &str) {
        self.inner.isolated.remove(&NodeId::new(id));
    }

    fn is_isolated(&self, id: &NodeId) -> bool {
        self.inner.isolated.contains(id)
    }
}

/// One node's view of a [`ChannelNetwork`].
#[derive(Clone)]
pub struct ChannelTransport {
    local: NodeId,
    network: ChannelNetwork,
}

#[async_trait]
impl PeerTransport for ChannelTransport {
    fn local_id(&self) -> Option<NodeId> {
        Some(self.local.clone())
    }

    fn node_ids(&self) -> Vec<NodeId> {
        self.network.inner.members.clone()
    }

    async fn send_batch(&self, dest: &NodeId, batch: ReplicationBatch) -> Result<()> {
        if self.network.is_isolated(&self.local) || self.network.is_isolated(dest) {
            return Err(TxnError::PeerUnreachable {
                peer: dest.clone(),
                msg: "network partition".to_string(),
            });
        }
        let inbox = self
            .network
            .inner
            .inboxes
            .get(dest)
            .ok_or_else(|| TxnError::PeerUnreachable {
                peer: dest.clone(),
                msg: "unknown node".to_string(),
            })?;
        inbox
            .send(Envelope {
                src: self.local.clone(),
                batch,
            })
            .map_err(|_| TxnError::PeerUnreachable {
                peer: dest.clone(),
                msg: "inbox closed".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Timestamp, WriteRecord};

    fn batch() -> ReplicationBatch {
        ReplicationBatch::new(vec![WriteRecord::new(1, 10, Timestamp::new(7))])
    }

    #[tokio::test]
    async fn test_send_reaches_inbox() {
        let net = ChannelNetwork::new(["n1", "n2"]);
        let t1 = net.transport("n1");
        let mut inbox = net.take_inbox("n2").await.unwrap();

        t1.send_batch(&NodeId::new("n2"), batch()).await.unwrap();
        let env = inbox.recv().await.unwrap();
        assert_eq!(env.src, NodeId::new("n1"));
        assert_eq!(env.batch, batch());
    }

    #[tokio::test]
    async fn test_membership() {
        let net = ChannelNetwork::new(["n1", "n2", "n3"]);
        let t = net.transport("n2");
        assert_eq!(t.local_id(), Some(NodeId::new("n2")));
        assert_eq!(t.node_ids().len(), 3);
    }

    #[tokio::test]
    async fn test_inbox_taken_once() {
        let net = ChannelNetwork::new(["n1"]);
        assert!(net.take_inbox("n1").await.is_some());
        assert!(net.take_inbox("n1").await.is_none());
        assert!(net.take_inbox("n9").await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_destination() {
        let net = ChannelNetwork::new(["n1"]);
        let err = net
            .transport("n1")
            .send_batch(&NodeId::new("n9"), batch())
            .await
            .unwrap_err();
        assert!(matches!(err, TxnError::PeerUnreachable { .. }));
    }

    #[tokio::test]
    async fn test_isolate_and_heal() {
        let net = ChannelNetwork::new(["n1", "n2"]);
        let t1 = net.transport("n1");
        let mut inbox = net.take_inbox("n2").await.unwrap();

        net.isolate("n2");
        assert!(t1.send_batch(&NodeId::new("n2"), batch()).await.is_err());

        net.heal("n2");
        t1.send_batch(&NodeId::new("n2"), batch()).await.unwrap();
        assert!(inbox.recv().await.is_some());
        assert!(inbox.try_recv().is_err());
    }
}
