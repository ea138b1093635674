//! Maelstrom message envelope and the bodies this node speaks.
//!
//! Every message is one JSON object per line:
//! `{"src": .., "dest": .., "body": {"type": .., "msg_id": .., ...}}`.

use lwwkv_txn::{OperationResult, RawOperation, TxnError, WriteRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Maelstrom error codes used in `error` replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    /// The message type is not handled by this node.
    NotSupported = 10,
    /// The request was understood but its contents are invalid.
    MalformedRequest = 12,
    /// The node failed while handling an otherwise valid request.
    Crash = 13,
}

impl ErrorCode {
    /// Numeric wire value.
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl From<&TxnError> for ErrorCode {
    fn from(err: &TxnError) -> Self {
        match err {
            TxnError::MalformedOperation { .. } | TxnError::Serialization(_) => {
                ErrorCode::MalformedRequest
            }
            _ => ErrorCode::Crash,
        }
    }
}

/// One Maelstrom message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Sending node or client.
    pub src: String,
    /// Receiving node.
    pub dest: String,
    /// Message body.
    pub body: Body,
}

/// Body fields shared by every message type, plus the typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Body {
    /// Sender-assigned ID, echoed back as `in_reply_to`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<u64>,
    /// ID of the request this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<u64>,
    /// Type-specific fields.
    #[serde(flatten)]
    pub payload: Payload,
}

/// Typed message payloads, tagged by the body's `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Cluster membership handed to the node at startup.
    Init {
        /// This node's ID.
        node_id: String,
        /// All node IDs, this node included.
        node_ids: Vec<String>,
    },
    /// Acknowledges `init`.
    InitOk,
    /// Client transaction.
    Txn {
        /// Operations in `[kind, key, value]` form.
        txn: Vec<RawOperation>,
    },
    /// Completed transaction.
    TxnOk {
        /// One result per operation, in order.
        txn: Vec<OperationResult>,
    },
    /// Anti-entropy batch from a peer. Never answered.
    Replicate {
        /// Replicated writes.
        records: Vec<WriteRecord>,
    },
    /// Request failure.
    Error {
        /// Maelstrom error code.
        code: u16,
        /// Human-readable reason.
        text: String,
    },
}

impl Payload {
    /// Builds an `error` payload.
    pub fn error(code: ErrorCode, text: impl Into<String>) -> Self {
        Payload::Error {
            code: code.code(),
            text: text.into(),
        }
    }
}

const KNOWN_TYPES: &[&str] = &["init", "init_ok", "txn", "txn_ok", "replicate", "error"];

/// Result of decoding one inbound line.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A well-formed message.
    Request(Message),
    /// The envelope parsed but the body did not; answer with an error.
    Rejected {
        /// Sender to reply to.
        src: String,
        /// Local node the message was addressed to.
        dest: String,
        /// Request ID, if one could be read.
        msg_id: Option<u64>,
        /// Error code for the reply.
        code: ErrorCode,
        /// Reason for the reply.
        text: String,
    },
}

#[derive(Deserialize)]
struct RawEnvelope {
    src: String,
    dest: String,
    body: Json,
}

/// Decodes one line of input.
///
/// Returns `Err` only when not even the envelope can be read, in which
/// case nobody can be answered.
pub fn decode_line(line: &str) -> serde_json::Result<Inbound> {
    let raw: RawEnvelope = serde_json::from_str(line)?;
    let msg_id = raw.body.get("msg_id").and_then(Json::as_u64);
    let kind = raw
        .body
        .get("type")
        .and_then(Json::as_str)
        .unwrap_or_default()
        .to_string();

    match serde_json::from_value::<Body>(raw.body) {
        Ok(body) => Ok(Inbound::Request(Message {
            src: raw.src,
            dest: raw.dest,
            body,
        })),
        Err(e) => {
            let (code, text) = if KNOWN_TYPES.contains(&kind.as_str()) {
                (ErrorCode::MalformedRequest, format!("malformed {}: {}", kind, e))
            } else {
                (ErrorCode::NotSupported, format!("unsupported message type {:?}", kind))
            };
            Ok(Inbound::Rejected {
                src: raw.src,
                dest: raw.dest,
                msg_id,
                code,
                text,
            })
        }
    }
}
