//! Line-oriented Maelstrom event loop.
//!
//! Each inbound line is handled on its own task. All replies and
//! replication traffic go through a single writer task. End of input stops
//! the publisher, waits for in-flight handlers and drains the writer.

use lwwkv_txn::{KvNode, NodeConfig, ReplicationBatch};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::protocol::{decode_line, ErrorCode, Inbound, Message, Payload};
use crate::transport::{MaelstromTransport, Outbox};

/// Runs a node until `input` reaches end of file.
pub async fn run<R, W>(config: NodeConfig, input: R, output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outbox, outbound) = Outbox::new();
    let transport = Arc::new(MaelstromTransport::new(outbox.clone()));
    let node = Arc::new(KvNode::new(config, transport.clone())?);
    let handler = Arc::new(Handler {
        node,
        transport,
        outbox,
        started: AtomicBool::new(false),
    });
    let writer = tokio::spawn(write_loop(outbound, output));

    let mut tasks = JoinSet::new();
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let handler = Arc::clone(&handler);
        tasks.spawn(async move { handler.handle_line(&line).await });
        while let Some(done) = tasks.try_join_next() {
            log_join(done);
        }
    }

    info!("input closed, shutting down");
    while let Some(done) = tasks.join_next().await {
        log_join(done);
    }
    handler.shutdown().await;

    // The writer exits once the last outbox handle is gone.
    drop(handler);
    writer.await??;
    Ok(())
}

fn log_join(done: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = done {
        error!(error = %e, "message handler failed");
    }
}

async fn write_loop<W>(mut outbound: mpsc::UnboundedReceiver<Message>, mut output: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = outbound.recv().await {
        let mut line = serde_json::to_vec(&msg)?;
        line.push(b'\n');
        output.write_all(&line).await?;
        output.flush().await?;
    }
    Ok(())
}

struct Handler {
    node: Arc<KvNode>,
    transport: Arc<MaelstromTransport>,
    outbox: Outbox,
    started: AtomicBool,
}

impl Handler {
    async fn handle_line(&self, line: &str) {
        match decode_line(line) {
            Ok(Inbound::Request(msg)) => self.handle(msg).await,
            Ok(Inbound::Rejected {
                src,
                dest,
                msg_id,
                code,
                text,
            }) => {
                warn!(%src, ?code, %text, "rejecting message");
                self.reply(&dest, &src, msg_id, Payload::error(code, text));
            }
            Err(e) => warn!(error = %e, "dropping undecodable line"),
        }
    }

    async fn handle(&self, msg: Message) {
        let Message { src, dest, body } = msg;
        let msg_id = body.msg_id;

        let reply = match body.payload {
            Payload::Init { node_id, node_ids } => {
                self.transport.set_membership(&node_id, &node_ids);
                self.node.start().await;
                self.started.store(true, Ordering::SeqCst);
                info!(%node_id, nodes = node_ids.len(), "node initialised");
                Some(Payload::InitOk)
            }
            Payload::Txn { txn } => Some(match self.node.execute_raw(&txn).await {
                Ok(results) => Payload::TxnOk { txn: results },
                Err(e) => {
                    warn!(%src, error = %e, "transaction rejected");
                    Payload::error(ErrorCode::from(&e), e.to_string())
                }
            }),
            Payload::Replicate { records } => {
                let batch = ReplicationBatch::new(records);
                match self.node.apply_replicated(&batch).await {
                    Ok(summary) => debug!(
                        %src,
                        applied = summary.applied,
                        discarded = summary.discarded,
                        "applied replicated batch"
                    ),
                    Err(e) => warn!(%src, error = %e, "failed to apply replicated batch"),
                }
                None
            }
            other => {
                debug!(%src, payload = ?other, "ignoring reply-type message");
                None
            }
        };

        if let Some(payload) = reply {
            self.reply(&dest, &src, msg_id, payload);
        }
    }

    fn reply(&self, from: &str, to: &str, in_reply_to: Option<u64>, payload: Payload) {
        if let Err(e) = self.outbox.send(from, to, in_reply_to, payload) {
            warn!(%to, error = %e, "reply dropped");
        }
    }

    async fn shutdown(&self) {
        if self.started.load(Ordering::SeqCst) {
            self.node.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value as Json};
    use std::time::Duration;
    use tokio::io::{duplex, BufReader, DuplexStream, Lines};
    use tokio::task::JoinHandle;

    struct Harness {
        input: DuplexStream,
        output: Lines<BufReader<DuplexStream>>,
        task: JoinHandle<Result<()>>,
    }

    impl Harness {
        fn start() -> Self {
            let config = NodeConfig {
                publish_interval_ms: 3_600_000,
                ..Default::default()
            };
            let (input, node_in) = duplex(1 << 20);
            let (node_out, output) = duplex(1 << 20);
            let task = tokio::spawn(run(config, BufReader::new(node_in), node_out));
            Self {
                input,
                output: BufReader::new(output).lines(),
                task,
            }
        }

        async fn send(&mut self, msg: Json) {
            let mut line = msg.to_string();
            line.push('\n');
            self.input.write_all(line.as_bytes()).await.unwrap();
        }

        async fn recv(&mut self) -> Option<Json> {
            next_message(&mut self.output).await
        }

        async fn request(&mut self, body: Json) -> Json {
            self.send(json!({"src": "c1", "dest": "n1", "body": body}))
                .await;
            self.recv().await.expect("reply")
        }

        async fn init(&mut self) {
            let reply = self
                .request(json!({"type": "init", "msg_id": 1, "node_id": "n1", "node_ids": ["n1", "n2"]}))
                .await;
            assert_eq!(reply["body"]["type"], "init_ok");
            assert_eq!(reply["body"]["in_reply_to"], 1);
        }

        async fn finish(self) -> Vec<Json> {
            let Harness {
                input,
                mut output,
                task,
            } = self;
            drop(input);
            let mut rest = Vec::new();
            while let Some(msg) = next_message(&mut output).await {
                rest.push(msg);
            }
            task.await.unwrap().unwrap();
            rest
        }
    }

    async fn next_message(output: &mut Lines<BufReader<DuplexStream>>) -> Option<Json> {
        tokio::time::timeout(Duration::from_secs(2), output.next_line())
            .await
            .expect("timed out waiting for output")
            .unwrap()
            .map(|line| serde_json::from_str(&line).unwrap())
    }

    #[tokio::test]
    async fn test_init_then_transactions() {
        let mut h = Harness::start();
        h.init().await;

        let reply = h
            .request(json!({"type": "txn", "msg_id": 2, "txn": [["w", 1, 10], ["w", 2, 20]]}))
            .await;
        assert_eq!(reply["src"], "n1");
        assert_eq!(reply["dest"], "c1");
        assert_eq!(reply["body"]["type"], "txn_ok");
        assert_eq!(reply["body"]["txn"], json!([["w", 1, 10], ["w", 2, 20]]));

        let reply = h
            .request(json!({"type": "txn", "msg_id": 3, "txn": [["r", 1, null], ["r", 3, null]]}))
            .await;
        assert_eq!(reply["body"]["in_reply_to"], 3);
        assert_eq!(reply["body"]["txn"], json!([["r", 1, 10], ["r", 3, null]]));

        // Shutdown flushes queued writes to the peer.
        let rest = h.finish().await;
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0]["dest"], "n2");
        assert_eq!(rest[0]["body"]["type"], "replicate");
        assert_eq!(rest[0]["body"]["records"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_txn_gets_error_12() {
        let mut h = Harness::start();
        h.init().await;
        let reply = h
            .request(json!({"type": "txn", "msg_id": 2, "txn": [["x", 1, null]]}))
            .await;
        assert_eq!(reply["body"]["type"], "error");
        assert_eq!(reply["body"]["code"], 12);
        assert_eq!(reply["body"]["in_reply_to"], 2);
        assert!(h.finish().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_type_gets_error_10() {
        let mut h = Harness::start();
        let reply = h.request(json!({"type": "echo", "msg_id": 9})).await;
        assert_eq!(reply["body"]["type"], "error");
        assert_eq!(reply["body"]["code"], 10);
        assert_eq!(reply["body"]["in_reply_to"], 9);
        h.finish().await;
    }

    #[tokio::test]
    async fn test_replicate_is_applied_without_reply() {
        let mut h = Harness::start();
        h.init().await;
        h.send(json!({
            "src": "n2",
            "dest": "n1",
            "body": {"type": "replicate", "records": [{"key": 4, "value": 40, "timestamp": 5}]}
        }))
        .await;

        let mut seen = Json::Null;
        for id in 10..200 {
            let reply = h
                .request(json!({"type": "txn", "msg_id": id, "txn": [["r", 4, null]]}))
                .await;
            assert_eq!(reply["body"]["type"], "txn_ok");
            seen = reply["body"]["txn"][0][2].clone();
            if seen == json!(40) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(seen, json!(40));
        assert!(h.finish().await.is_empty());
    }

    #[tokio::test]
    async fn test_garbage_and_blank_lines_ignored() {
        let mut h = Harness::start();
        h.input.write_all(b"not json\n\n").await.unwrap();
        h.init().await;
        h.finish().await;
    }
}
