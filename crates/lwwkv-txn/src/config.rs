//! Node configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TxnError};

/// What a writer does when the replication queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait until the publisher frees capacity.
    #[default]
    Block,
    /// Discard the incoming record; peers never see that write.
    DropNewest,
}

/// What happens to still-queued records when the publisher stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Publish one final batch before stopping.
    #[default]
    Flush,
    /// Drop whatever is still queued.
    Discard,
}

/// Configuration for one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Interval between anti-entropy publish ticks (ms).
    pub publish_interval_ms: u64,
    /// Maximum number of write records buffered between ticks.
    pub queue_capacity: usize,
    /// Behavior when the queue is full.
    pub overflow_policy: OverflowPolicy,
    /// A tick only publishes once at least this many records are queued.
    pub min_batch_size: usize,
    /// `None` for one lock per key, `Some(n)` for `n` hashed lock stripes.
    pub lock_stripes: Option<usize>,
    /// Behavior for queued records on shutdown.
    pub shutdown_policy: ShutdownPolicy,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            publish_interval_ms: 1000,
            queue_capacity: 4096,
            overflow_policy: OverflowPolicy::Block,
            min_batch_size: 1,
            lock_stripes: None,
            shutdown_policy: ShutdownPolicy::Flush,
        }
    }
}

impl NodeConfig {
    /// Loads a config from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: NodeConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => {
                return Err(TxnError::Config {
                    msg: format!("unsupported config file extension: {:?}", ext),
                })
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.publish_interval_ms == 0 {
            return Err(TxnError::Config {
                msg: "publish_interval_ms must be > 0".to_string(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(TxnError::Config {
                msg: "queue_capacity must be > 0".to_string(),
            });
        }
        if self.min_batch_size == 0 || self.min_batch_size > self.queue_capacity {
            return Err(TxnError::Config {
                msg: format!(
                    "min_batch_size must be in 1..={}, got {}",
                    self.queue_capacity, self.min_batch_size
                ),
            });
        }
        if self.lock_stripes == Some(0) {
            return Err(TxnError::Config {
                msg: "lock_stripes must be > 0 when set".to_string(),
            });
        }
        Ok(())
    }

    /// Publish interval as a `Duration`.
    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }
}
