//! A single replica: wires the store, lock manager, transaction engine,
//! replication queue, publisher and conflict resolver together.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::NodeConfig;
use crate::conflict_resolver::{ApplySummary, ConflictResolver, ResolverStats};
use crate::error::Result;
use crate::locking::{LockLayout, LockManager};
use crate::publisher::{AntiEntropyPublisher, PublishSummary, PublisherConfig, PublisherHandle, PublisherStats};
use crate::queue::{QueueStats, ReplicationQueue};
use crate::store::Store;
use crate::transaction::TransactionEngine;
use crate::transport::{Envelope, PeerTransport};
use crate::types::{Key, Operation, OperationResult, RawOperation, ReplicationBatch, Value};

/// Counters from every component of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeStats {
    /// Replication queue counters.
    pub queue: QueueStats,
    /// Publisher counters.
    pub publisher: PublisherStats,
    /// Conflict resolver counters.
    pub resolver: ResolverStats,
    /// Keys with a value.
    pub keys: usize,
    /// Lock table entries.
    pub locks: usize,
}

/// One totally-available replica.
pub struct KvNode {
    config: NodeConfig,
    locks: Arc<LockManager>,
    store: Arc<Store>,
    queue: Arc<ReplicationQueue>,
    engine: TransactionEngine,
    resolver: ConflictResolver,
    publisher: Arc<AntiEntropyPublisher>,
    handle: Mutex<Option<PublisherHandle>>,
}

impl KvNode {
    /// Creates a node stamping writes with the system clock.
    pub fn new(config: NodeConfig, transport: Arc<dyn PeerTransport>) -> Result<Self> {
        Self::with_clock(config, transport, Arc::new(SystemClock))
    }

    /// Creates a node with an explicit clock.
    pub fn with_clock(
        config: NodeConfig,
        transport: Arc<dyn PeerTransport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let locks = Arc::new(LockManager::with_layout(LockLayout::from_stripes(
            config.lock_stripes,
        )));
        let store = Arc::new(Store::new());
        let queue = Arc::new(ReplicationQueue::new(
            config.queue_capacity,
            config.overflow_policy,
        ));
        let engine = TransactionEngine::new(
            Arc::clone(&locks),
            Arc::clone(&store),
            Arc::clone(&queue),
            clock,
        );
        let resolver = ConflictResolver::new(Arc::clone(&locks), Arc::clone(&store));
        let publisher = Arc::new(AntiEntropyPublisher::new(
            PublisherConfig::from(&config),
            Arc::clone(&queue),
            transport,
        ));

        Ok(Self {
            config,
            locks,
            store,
            queue,
            engine,
            resolver,
            publisher,
            handle: Mutex::new(None),
        })
    }

    /// Configuration in use.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Starts the anti-entropy publisher. Calling it twice is a no-op.
    pub async fn start(&self) {
        let mut handle = self.handle.lock().await;
        if handle.is_none() {
            *handle = Some(Arc::clone(&self.publisher).spawn());
        }
    }

    /// Stops the publisher, flushing or discarding the queue per config.
    /// Local transactions keep working afterwards, but their writes are no
    /// longer replicated.
    pub async fn stop(&self) {
        let handle = self.handle.lock().await.take();
        match handle {
            Some(handle) => handle.stop().await,
            None => warn!("stop called on a node that was not started"),
        }
    }

    /// Executes a typed transaction.
    pub async fn execute(&self, ops: &[Operation]) -> Result<Vec<OperationResult>> {
        self.engine.execute(ops).await
    }

    /// Decodes and executes a wire-form transaction.
    pub async fn execute_raw(&self, raw: &[RawOperation]) -> Result<Vec<OperationResult>> {
        self.engine.execute_raw(raw).await
    }

    /// Applies a batch received from a peer.
    pub async fn apply_replicated(&self, batch: &ReplicationBatch) -> Result<ApplySummary> {
        self.resolver.apply(batch).await
    }

    /// Publishes queued writes immediately instead of waiting for the timer.
    pub async fn publish_now(&self) -> PublishSummary {
        self.publisher.publish_now().await
    }

    /// Current value of `key` without taking its lock.
    pub fn read_local(&self, key: Key) -> Option<Value> {
        self.store.read(key)
    }

    /// Sorted key/value pairs.
    pub fn snapshot(&self) -> Vec<(Key, Value)> {
        self.store.snapshot()
    }

    /// Counters from every component.
    pub fn stats(&self) -> NodeStats {
        NodeStats {
            queue: self.queue.stats(),
            publisher: self.publisher.stats(),
            resolver: self.resolver.stats(),
            keys: self.store.len(),
            locks: self.locks.lock_count(),
        }
    }

    /// Applies every batch arriving on `inbox`, each on its own task, until
    /// the channel closes.
    pub fn serve_inbox(
        self: Arc<Self>,
        mut inbox: mpsc::UnboundedReceiver<Envelope>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(envelope) = inbox.recv().await {
                let node = Arc::clone(&self);
                tokio::spawn(async move {
                    match node.apply_replicated(&envelope.batch).await {
                        Ok(summary) => debug!(
                            src = %envelope.src,
                            applied = summary.applied,
                            discarded = summary.discarded,
                            "applied replicated batch"
                        ),
                        Err(e) => warn!(src = %envelope.src, error = %e, "failed to apply batch"),
                    }
                });
            }
            info!("inbox closed");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ShutdownPolicy;
    use crate::transport::ChannelNetwork;
    use crate::types::{Timestamp, WriteRecord};

    fn node(net: &ChannelNetwork, id: &str, clock: Arc<ManualClock>) -> Arc<KvNode> {
        let config = NodeConfig {
            publish_interval_ms: 3_600_000,
            ..Default::default()
        };
        Arc::new(KvNode::with_clock(config, Arc::new(net.transport(id)), clock).unwrap())
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let net = ChannelNetwork::new(["n1"]);
        let config = NodeConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(KvNode::new(config, Arc::new(net.transport("n1"))).is_err());
    }

    #[tokio::test]
    async fn test_execute_and_publish() {
        let net = ChannelNetwork::new(["n1", "n2"]);
        let mut inbox = net.take_inbox("n2").await.unwrap();
        let n1 = node(&net, "n1", Arc::new(ManualClock::new(7)));

        n1.execute(&[Operation::Write { key: 1, value: 10 }])
            .await
            .unwrap();
        assert_eq!(n1.read_local(1), Some(10));

        let summary = n1.publish_now().await;
        assert_eq!(summary.records, 1);
        let env = inbox.recv().await.unwrap();
        assert_eq!(
            env.batch.records,
            vec![WriteRecord::new(1, 10, Timestamp::new(7))]
        );
    }

    #[tokio::test]
    async fn test_replicated_older_write_does_not_clobber_local() {
        let net = ChannelNetwork::new(["n1", "n2"]);
        let n1 = node(&net, "n1", Arc::new(ManualClock::new(100)));

        n1.execute(&[Operation::Write { key: 1, value: 10 }])
            .await
            .unwrap();
        let summary = n1
            .apply_replicated(&ReplicationBatch::new(vec![WriteRecord::new(
                1,
                99,
                Timestamp::new(50),
            )]))
            .await
            .unwrap();
        assert_eq!(summary.discarded, 1);
        assert_eq!(n1.read_local(1), Some(10));
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let net = ChannelNetwork::new(["n1", "n2"]);
        let mut inbox = net.take_inbox("n2").await.unwrap();
        let n1 = node(&net, "n1", Arc::new(ManualClock::new(1)));
        assert_eq!(n1.config().shutdown_policy, ShutdownPolicy::Flush);

        n1.start().await;
        n1.start().await;
        n1.execute(&[Operation::Write { key: 3, value: 30 }])
            .await
            .unwrap();
        n1.stop().await;

        let env = inbox.try_recv().unwrap();
        assert_eq!(env.batch.len(), 1);

        // Still answers locally after stop.
        let results = n1.execute(&[Operation::Read { key: 3 }]).await.unwrap();
        assert_eq!(results, vec![OperationResult::Read { key: 3, value: Some(30) }]);
        n1.execute(&[Operation::Write { key: 4, value: 40 }])
            .await
            .unwrap();
        assert_eq!(n1.stats().queue.dropped, 1);
    }

    #[tokio::test]
    async fn test_stats() {
        let net = ChannelNetwork::new(["n1"]);
        let n1 = node(&net, "n1", Arc::new(ManualClock::new(1)));
        n1.execute(&[
            Operation::Write { key: 1, value: 1 },
            Operation::Read { key: 2 },
        ])
        .await
        .unwrap();
        let stats = n1.stats();
        assert_eq!(stats.keys, 1);
        assert_eq!(stats.locks, 2);
        assert_eq!(stats.queue.enqueued, 1);
    }

    #[tokio::test]
    async fn test_serve_inbox_applies_batches() {
        let net = ChannelNetwork::new(["n1", "n2"]);
        let inbox = net.take_inbox("n2").await.unwrap();
        let n1 = node(&net, "n1", Arc::new(ManualClock::new(5)));
        let n2 = node(&net, "n2", Arc::new(ManualClock::new(1)));
        let _server = Arc::clone(&n2).serve_inbox(inbox);

        n1.execute(&[Operation::Write { key: 8, value: 80 }])
            .await
            .unwrap();
        n1.publish_now().await;

        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while n2.read_local(8).is_none() {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("replicated write should arrive");
        assert_eq!(n2.read_local(8), Some(80));
    }
}
