//! Errors raised by the node runtime.

use thiserror::Error;

/// Runtime-level failures that end the node process.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Transaction subsystem failure, e.g. invalid configuration.
    #[error("txn error: {0}")]
    Txn(#[from] lwwkv_txn::TxnError),

    /// Reading stdin or writing stdout failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An outbound message could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// The stdout writer task panicked or was cancelled.
    #[error("writer task failed: {0}")]
    Writer(#[from] tokio::task::JoinError),
}

/// Result alias for runtime operations.
pub type Result<T> = std::result::Result<T, NodeError>;
