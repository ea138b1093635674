//! Peer transport over Maelstrom stdout.
//!
//! Outbound messages from every task funnel into one channel drained by the
//! stdout writer, so lines are never interleaved.

use async_trait::async_trait;
use lwwkv_txn::transport::PeerTransport;
use lwwkv_txn::{NodeId, ReplicationBatch, Result, TxnError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tracing::warn;

use crate::protocol::{Body, Message, Payload};

/// Cloneable handle for queueing outbound messages.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Message>,
    next_msg_id: Arc<AtomicU64>,
}

impl Outbox {
    /// Creates an outbox and the receiver the writer task drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                next_msg_id: Arc::new(AtomicU64::new(1)),
            },
            rx,
        )
    }

    /// Queues a message with a fresh `msg_id`.
    pub fn send(
        &self,
        src: &str,
        dest: &str,
        in_reply_to: Option<u64>,
        payload: Payload,
    ) -> Result<()> {
        let msg = Message {
            src: src.to_string(),
            dest: dest.to_string(),
            body: Body {
                msg_id: Some(self.next_msg_id.fetch_add(1, Ordering::Relaxed)),
                in_reply_to,
                payload,
            },
        };
        self.tx.send(msg).map_err(|_| TxnError::Shutdown)
    }
}

#[derive(Debug)]
struct Membership {
    local: NodeId,
    nodes: Vec<NodeId>,
}

/// [`PeerTransport`] that ships `replicate` messages through the [`Outbox`].
///
/// Membership is unknown until the `init` message arrives.
pub struct MaelstromTransport {
    outbox: Outbox,
    membership: OnceLock<Membership>,
}

impl MaelstromTransport {
    /// Creates a transport with no membership yet.
    pub fn new(outbox: Outbox) -> Self {
        Self {
            outbox,
            membership: OnceLock::new(),
        }
    }

    /// Records the membership from `init`. Later calls are ignored.
    pub fn set_membership(&self, local: &str, nodes: &[String]) -> bool {
        let membership = Membership {
            local: NodeId::new(local),
            nodes: nodes.iter().map(NodeId::new).collect(),
        };
        let set = self.membership.set(membership).is_ok();
        if !set {
            warn!(node_id = local, "membership already set, ignoring repeated init");
        }
        set
    }
}

#[async_trait]
impl PeerTransport for MaelstromTransport {
    fn local_id(&self) -> Option<NodeId> {
        self.membership.get().map(|m| m.local.clone())
    }

    fn node_ids(&self) -> Vec<NodeId> {
        self.membership
            .get()
            .map(|m| m.nodes.clone())
            .unwrap_or_default()
    }

    async fn send_batch(&self, dest: &NodeId, batch: ReplicationBatch) -> Result<()> {
        let membership = self.membership.get().ok_or_else(|| TxnError::PeerUnreachable {
            peer: dest.clone(),
            msg: "node not initialised".to_string(),
        })?;
        self.outbox
            .send(
                membership.local.as_str(),
                dest.as_str(),
                None,
                Payload::Replicate {
                    records: batch.records,
                },
            )
            .map_err(|_| TxnError::PeerUnreachable {
                peer: dest.clone(),
                msg: "stdout writer closed".to_string(),
            })
    }
}
