//! Anti-entropy publisher: periodic fanout of queued writes to every peer.
//!
//! On each tick the whole queue is drained into one batch which is sent to
//! all other nodes in parallel. Delivery is fire-and-forget: a failed send
//! is logged and counted, never retried or re-queued.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{NodeConfig, ShutdownPolicy};
use crate::queue::ReplicationQueue;
use crate::transport::PeerTransport;
use crate::types::{NodeId, ReplicationBatch};

/// Publisher settings, usually derived from [`NodeConfig`].
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Time between ticks.
    pub interval: Duration,
    /// A tick publishes only when at least this many records are queued.
    pub min_batch_size: usize,
    /// What to do with queued records on stop.
    pub shutdown_policy: ShutdownPolicy,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self::from(&NodeConfig::default())
    }
}

impl From<&NodeConfig> for PublisherConfig {
    fn from(config: &NodeConfig) -> Self {
        Self {
            interval: config.publish_interval(),
            min_batch_size: config.min_batch_size.max(1),
            shutdown_policy: config.shutdown_policy,
        }
    }
}

/// Result of sending one batch to one peer.
#[derive(Debug, Clone)]
pub struct PeerSendResult {
    /// Destination node.
    pub peer: NodeId,
    /// Error message if the send failed.
    pub error: Option<String>,
}

/// Summary of one publish round.
#[derive(Debug, Clone, Default)]
pub struct PublishSummary {
    /// Records in the batch.
    pub records: usize,
    /// Per-peer outcomes, sorted by peer ID.
    pub results: Vec<PeerSendResult>,
}

impl PublishSummary {
    /// Number of peers the batch was sent to.
    pub fn peers(&self) -> usize {
        self.results.len()
    }

    /// Number of peers whose send failed.
    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.error.is_some()).count()
    }
}

#[derive(Debug, Default)]
struct PublisherStatsInner {
    ticks: AtomicU64,
    batches_published: AtomicU64,
    records_published: AtomicU64,
    send_failures: AtomicU64,
    records_discarded: AtomicU64,
}

/// Snapshot of publisher counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublisherStats {
    /// Timer ticks observed.
    pub ticks: u64,
    /// Batches drained and fanned out.
    pub batches_published: u64,
    /// Records drained into published batches.
    pub records_published: u64,
    /// Failed per-peer sends.
    pub send_failures: u64,
    /// Records dropped by a `Discard` shutdown.
    pub records_discarded: u64,
}

/// Drains the replication queue and broadcasts batches to peers.
pub struct AntiEntropyPublisher {
    config: PublisherConfig,
    queue: Arc<ReplicationQueue>,
    transport: Arc<dyn PeerTransport>,
    stats: PublisherStatsInner,
}

impl AntiEntropyPublisher {
    /// Creates a publisher. Nothing runs until [`spawn`](Self::spawn).
    pub fn new(
        config: PublisherConfig,
        queue: Arc<ReplicationQueue>,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        Self {
            config,
            queue,
            transport,
            stats: PublisherStatsInner::default(),
        }
    }

    /// Every known node except the local one.
    pub fn peers(&self) -> Vec<NodeId> {
        let local = self.transport.local_id();
        self.transport
            .node_ids()
            .into_iter()
            .filter(|id| Some(id) != local.as_ref())
            .collect()
    }

    /// One timer tick: publishes if the queue holds at least
    /// `min_batch_size` records.
    pub async fn tick(&self) -> Option<PublishSummary> {
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);
        if self.queue.is_empty() || self.queue.len() < self.config.min_batch_size {
            return None;
        }
        Some(self.publish_now().await)
    }

    /// Drains everything queued and sends it to all peers, ignoring the
    /// batch threshold.
    pub async fn publish_now(&self) -> PublishSummary {
        let records = self.queue.drain().await;
        if records.is_empty() {
            return PublishSummary::default();
        }

        let batch = ReplicationBatch::new(records);
        let summary = self.fanout(batch).await;

        self.stats.batches_published.fetch_add(1, Ordering::Relaxed);
        self.stats
            .records_published
            .fetch_add(summary.records as u64, Ordering::Relaxed);
        self.stats
            .send_failures
            .fetch_add(summary.failed() as u64, Ordering::Relaxed);
        summary
    }

    async fn fanout(&self, batch: ReplicationBatch) -> PublishSummary {
        let records = batch.len();
        let peers = self.peers();
        if peers.is_empty() {
            debug!(records, "no peers, batch not sent");
            return PublishSummary {
                records,
                results: Vec::new(),
            };
        }

        let mut handles = Vec::with_capacity(peers.len());
        for peer in peers {
            let transport = Arc::clone(&self.transport);
            let batch = batch.clone();
            handles.push(tokio::spawn(async move {
                let error = match transport.send_batch(&peer, batch).await {
                    Ok(()) => None,
                    Err(e) => Some(e.to_string()),
                };
                PeerSendResult { peer, error }
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "peer send task failed"),
            }
        }
        results.sort_by(|a, b| a.peer.cmp(&b.peer));

        for result in &results {
            match &result.error {
                None => debug!(peer = %result.peer, records, "batch sent"),
                Some(e) => warn!(peer = %result.peer, records, error = %e, "batch send failed, not retried"),
            }
        }

        PublishSummary { records, results }
    }

    /// Starts the periodic task.
    pub fn spawn(self: Arc<Self>) -> PublisherHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(stop_rx));
        PublisherHandle { stop_tx, task }
    }

    async fn run(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        info!(interval_ms = self.config.interval.as_millis() as u64, "anti-entropy publisher started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(summary) = self.tick().await {
                        debug!(records = summary.records, peers = summary.peers(), failed = summary.failed(), "published batch");
                    }
                }
                _ = stop_rx.changed() => break,
            }
        }

        self.queue.close().await;
        match self.config.shutdown_policy {
            ShutdownPolicy::Flush => {
                let summary = self.publish_now().await;
                info!(records = summary.records, "publisher stopped, queue flushed");
            }
            ShutdownPolicy::Discard => {
                let lost = self.queue.drain().await.len();
                self.stats
                    .records_discarded
                    .fetch_add(lost as u64, Ordering::Relaxed);
                if lost > 0 {
                    warn!(records = lost, "publisher stopped, unpublished records discarded");
                } else {
                    info!("publisher stopped");
                }
            }
        }
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            ticks: self.stats.ticks.load(Ordering::Relaxed),
            batches_published: self.stats.batches_published.load(Ordering::Relaxed),
            records_published: self.stats.records_published.load(Ordering::Relaxed),
            send_failures: self.stats.send_failures.load(Ordering::Relaxed),
            records_discarded: self.stats.records_discarded.load(Ordering::Relaxed),
        }
    }
}

/// Handle to a running publisher task.
pub struct PublisherHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PublisherHandle {
    /// Signals the task to stop and waits for its shutdown flush/discard.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "publisher task ended abnormally");
        }
    }

    /// Returns true once the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
