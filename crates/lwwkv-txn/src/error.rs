//! Error types for the transaction and replication subsystem.

use thiserror::Error;

use crate::types::{Key, NodeId};

/// Errors that can occur while executing transactions or replicating writes.
#[derive(Debug, Error)]
pub enum TxnError {
    /// An operation in a transaction could not be decoded.
    #[error("malformed operation at index {index}: {msg}")]
    MalformedOperation {
        /// Position of the offending operation in the transaction.
        index: usize,
        /// What was wrong with it.
        msg: String,
    },

    /// A store mutation was attempted without holding the key's exclusive lock.
    #[error("exclusive lock for key {key} not held")]
    LockNotHeld {
        /// The key that was about to be mutated.
        key: Key,
    },

    /// The replication queue has been closed.
    #[error("replication queue closed")]
    QueueClosed,

    /// A peer could not be reached while publishing a batch.
    #[error("peer {peer} unreachable: {msg}")]
    PeerUnreachable {
        /// The destination node.
        peer: NodeId,
        /// Transport-level reason.
        msg: String,
    },

    /// Invalid configuration.
    #[error("invalid config: {msg}")]
    Config {
        /// Error message describing the issue.
        msg: String,
    },

    /// The node was shut down.
    #[error("node shut down")]
    Shutdown,

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML config parse error.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for the transaction subsystem.
pub type Result<T> = std::result::Result<T, TxnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_operation_display() {
        let err = TxnError::MalformedOperation {
            index: 2,
            msg: "unknown kind \"x\"".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "malformed operation at index 2: unknown kind \"x\""
        );
    }

    #[test]
    fn test_lock_not_held_display() {
        let err = TxnError::LockNotHeld { key: -4 };
        assert_eq!(err.to_string(), "exclusive lock for key -4 not held");
    }

    #[test]
    fn test_peer_unreachable_display() {
        let err = TxnError::PeerUnreachable {
            peer: NodeId::new("n3"),
            msg: "channel closed".to_string(),
        };
        assert!(err.to_string().contains("n3"));
        assert!(err.to_string().contains("channel closed"));
    }

    #[test]
    fn test_from_serde_json() {
        let parse: std::result::Result<i64, _> = serde_json::from_str("nope");
        let err: TxnError = parse.unwrap_err().into();
        assert!(matches!(err, TxnError::Serialization(_)));
    }
}
