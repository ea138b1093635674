//! Command-line flags.

use clap::Parser;
use lwwkv_txn::{NodeConfig, Result};
use std::path::PathBuf;

/// lwwkv Maelstrom node. Speaks the Maelstrom protocol on stdin/stdout and
/// logs to stderr.
#[derive(Parser, Debug)]
#[command(name = "lwwkv-node")]
#[command(about = "Totally-available transactional KV node for Maelstrom", long_about = None)]
pub struct Cli {
    /// Config file (`.toml` or `.json`). Defaults apply when omitted.
    #[arg(short, long, env = "LWWKV_CONFIG")]
    pub config: Option<PathBuf>,

    /// Overrides `publish_interval_ms`.
    #[arg(long, env = "LWWKV_PUBLISH_INTERVAL_MS")]
    pub publish_interval_ms: Option<u64>,

    /// Overrides `queue_capacity`.
    #[arg(long, env = "LWWKV_QUEUE_CAPACITY")]
    pub queue_capacity: Option<usize>,

    /// Overrides `lock_stripes`.
    #[arg(long, env = "LWWKV_LOCK_STRIPES")]
    pub lock_stripes: Option<usize>,
}

impl Cli {
    /// Builds the node config: file (or defaults), then flag overrides.
    pub fn node_config(&self) -> Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::from_file(path)?,
            None => NodeConfig::default(),
        };
        if let Some(ms) = self.publish_interval_ms {
            config.publish_interval_ms = ms;
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if let Some(stripes) = self.lock_stripes {
            config.lock_stripes = Some(stripes);
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lwwkv_txn::OverflowPolicy;
    use std::io::Write;

    #[test]
    fn test_defaults_without_flags() {
        let cli = Cli::try_parse_from(["lwwkv-node"]).unwrap();
        assert_eq!(cli.node_config().unwrap(), NodeConfig::default());
    }

    #[test]
    fn test_flags_override() {
        let cli = Cli::try_parse_from([
            "lwwkv-node",
            "--publish-interval-ms",
            "250",
            "--queue-capacity",
            "64",
            "--lock-stripes",
            "8",
        ])
        .unwrap();
        let config = cli.node_config().unwrap();
        assert_eq!(config.publish_interval_ms, 250);
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.lock_stripes, Some(8));
    }

    #[test]
    fn test_flags_override_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "publish_interval_ms = 500\noverflow_policy = \"drop_newest\""
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let cli = Cli::try_parse_from(["lwwkv-node", "-c", &path, "--publish-interval-ms", "50"])
            .unwrap();
        let config = cli.node_config().unwrap();
        assert_eq!(config.publish_interval_ms, 50);
        assert_eq!(config.overflow_policy, OverflowPolicy::DropNewest);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let cli = Cli::try_parse_from(["lwwkv-node", "--lock-stripes", "0"]).unwrap();
        assert!(cli.node_config().is_err());
    }
}
