#![warn(missing_docs)]

//! lwwkv Maelstrom node: wire protocol, stdout transport and the
//! stdin-driven runtime around a [`lwwkv_txn::KvNode`].

pub mod cli;
pub mod error;
pub mod protocol;
pub mod runtime;
pub mod transport;

pub use error::{NodeError, Result};
pub use runtime::run;
