//! Core data types shared by the transaction engine and replication.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, TxnError};

/// Key identifier. The domain is unbounded.
pub type Key = i64;

/// Stored value. Absence is modelled with `Option<Value>`, never with a sentinel.
pub type Value = i64;

/// Wall-clock timestamp attached to every write, used for last-write-wins.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp from a raw value.
    pub fn new(ts: u64) -> Self {
        Timestamp(ts)
    }

    /// Returns the raw value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The timestamp one tick later.
    pub fn next(&self) -> Self {
        Timestamp(self.0.saturating_add(1))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a node in the cluster (e.g. `n1`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node ID.
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wire form of an operation or a result: `[kind, key, value|null]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawOperation(pub String, pub Key, pub Option<Value>);

/// A single step of a transaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(into = "RawOperation")]
pub enum Operation {
    /// Read the current value of a key.
    Read {
        /// Key to read.
        key: Key,
    },
    /// Overwrite the value of a key.
    Write {
        /// Key to write.
        key: Key,
        /// New value.
        value: Value,
    },
}

impl Operation {
    /// Key this operation touches.
    pub fn key(&self) -> Key {
        match self {
            Operation::Read { key } | Operation::Write { key, .. } => *key,
        }
    }

    /// Returns true for writes.
    pub fn is_write(&self) -> bool {
        matches!(self, Operation::Write { .. })
    }
}

impl RawOperation {
    /// Decodes the wire form into a typed operation.
    ///
    /// `index` is the position inside the transaction and is only used for
    /// error reporting.
    pub fn decode(&self, index: usize) -> Result<Operation> {
        let RawOperation(kind, key, value) = self;
        match kind.as_str() {
            "r" | "read" => Ok(Operation::Read { key: *key }),
            "w" | "write" => match value {
                Some(value) => Ok(Operation::Write {
                    key: *key,
                    value: *value,
                }),
                None => Err(TxnError::MalformedOperation {
                    index,
                    msg: format!("write to key {} has no value", key),
                }),
            },
            other => Err(TxnError::MalformedOperation {
                index,
                msg: format!("unknown operation kind {:?}", other),
            }),
        }
    }
}

/// Decodes a whole transaction; the first malformed operation rejects all of it.
pub fn decode_transaction(raw: &[RawOperation]) -> Result<Vec<Operation>> {
    raw.iter()
        .enumerate()
        .map(|(index, op)| op.decode(index))
        .collect()
}

impl From<Operation> for RawOperation {
    fn from(op: Operation) -> Self {
        match op {
            Operation::Read { key } => RawOperation("r".to_string(), key, None),
            Operation::Write { key, value } => RawOperation("w".to_string(), key, Some(value)),
        }
    }
}

/// Outcome of one operation, tagged like the operation that produced it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "RawOperation", try_from = "RawOperation")]
pub enum OperationResult {
    /// Value observed by a read; `None` means the key was not found.
    Read {
        /// Key that was read.
        key: Key,
        /// Observed value.
        value: Option<Value>,
    },
    /// Acknowledged write.
    Write {
        /// Key that was written.
        key: Key,
        /// Value that was written.
        value: Value,
    },
}

impl OperationResult {
    /// Key this result refers to.
    pub fn key(&self) -> Key {
        match self {
            OperationResult::Read { key, .. } | OperationResult::Write { key, .. } => *key,
        }
    }
}

impl From<OperationResult> for RawOperation {
    fn from(result: OperationResult) -> Self {
        match result {
            OperationResult::Read { key, value } => RawOperation("r".to_string(), key, value),
            OperationResult::Write { key, value } => {
                RawOperation("w".to_string(), key, Some(value))
            }
        }
    }
}

impl TryFrom<RawOperation> for OperationResult {
    type Error = TxnError;

    fn try_from(raw: RawOperation) -> Result<Self> {
        match raw.decode(0)? {
            Operation::Read { key } => Ok(OperationResult::Read { key, value: raw.2 }),
            Operation::Write { key, value } => Ok(OperationResult::Write { key, value }),
        }
    }
}

/// A committed write awaiting (or received through) replication.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRecord {
    /// Written key.
    pub key: Key,
    /// Written value.
    pub value: Value,
    /// Time of the original write on the originating node.
    pub timestamp: Timestamp,
}

impl WriteRecord {
    /// Creates a write record.
    pub fn new(key: Key, value: Value, timestamp: Timestamp) -> Self {
        Self {
            key,
            value,
            timestamp,
        }
    }
}

/// A batch of write records shipped to peers in one message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationBatch {
    /// Records in enqueue order.
    pub records: Vec<WriteRecord>,
}

impl ReplicationBatch {
    /// Wraps records into a batch.
    pub fn new(records: Vec<WriteRecord>) -> Self {
        Self { records }
    }

    /// Number of records in the batch.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the batch carries no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
