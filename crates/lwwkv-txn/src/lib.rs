#![warn(missing_docs)]

//! lwwkv transaction subsystem: per-key locked multi-key transactions,
//! anti-entropy replication and last-write-wins conflict resolution.

pub mod clock;
pub mod config;
pub mod conflict_resolver;
pub mod error;
pub mod locking;
pub mod node;
pub mod publisher;
pub mod queue;
pub mod store;
pub mod transaction;
pub mod transport;
pub mod types;

pub use config::{NodeConfig, OverflowPolicy, ShutdownPolicy};
pub use error::{Result, TxnError};
pub use node::KvNode;
pub use types::{
    Key, NodeId, Operation, OperationResult, RawOperation, ReplicationBatch, Timestamp, Value,
    WriteRecord,
};
